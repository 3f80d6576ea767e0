//! The whole pipeline behind one `tick`: bytes in, draw commands out.

use chrono::Timelike;
use embedded_graphics::prelude::Size;

use crate::{
    buzzer::{self, Note},
    config::{Config, ConfigError},
    nmea::{Fix, NmeaParser, ParseError, Sentence},
    path::PathTracker,
    sink::RecordSink,
    viewport::{DrawCommands, ViewportRenderer, ViewportState},
};

/// Counters for everything the pipeline dropped or skipped.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Valid position fixes.
    pub fixes: u32,
    /// Position sentences reporting no fix.
    pub no_fix: u32,
    /// Well-formed sentences that carry no position.
    pub ignored: u32,
    pub frame_overflows: u32,
    pub checksum_mismatches: u32,
    pub malformed_fields: u32,
}

impl Diagnostics {
    pub fn parse_errors(&self) -> u32 {
        self.frame_overflows
            .saturating_add(self.checksum_mismatches)
            .saturating_add(self.malformed_fields)
    }

    fn count(&mut self, err: ParseError) {
        let counter = match err {
            ParseError::FrameOverflow => &mut self.frame_overflows,
            ParseError::ChecksumMismatch { .. } => &mut self.checksum_mismatches,
            ParseError::MalformedField => &mut self.malformed_fields,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Net change of the receiver's fix state since it was last taken.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixChange {
    Acquired,
    Lost,
}

impl FixChange {
    pub fn cue(self) -> &'static [Note] {
        match self {
            FixChange::Acquired => buzzer::FIX_ACQUIRED,
            FixChange::Lost => buzzer::FIX_LOST,
        }
    }
}

pub struct TrailEngine<S, const N: usize> {
    parser: NmeaParser,
    tracker: PathTracker<S, N>,
    renderer: ViewportRenderer,
    display: Size,
    diagnostics: Diagnostics,
    // Cleared again when the receiver reports it lost the fix
    current_fix: Option<Fix>,
    // Fix state as of the last `take_fix_change`
    announced_fix: bool,
}

impl<S: RecordSink, const N: usize> TrailEngine<S, N> {
    pub fn new(config: &Config, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            parser: NmeaParser::new(),
            tracker: PathTracker::new(config.tracker, sink),
            renderer: ViewportRenderer::new(config.render),
            display: config.display,
            diagnostics: Diagnostics::default(),
            current_fix: None,
            announced_fix: false,
        })
    }

    /// Parses the bytes and ingests every fix they complete. Partial frames
    /// carry over to the next call.
    pub fn feed(&mut self, bytes: impl IntoIterator<Item = u8>) {
        for b in bytes {
            match self.parser.process_byte(b) {
                None => {}
                Some(Ok(Sentence::Fix(fix))) => self.handle_fix(fix),
                Some(Ok(Sentence::Other)) => {
                    self.diagnostics.ignored = self.diagnostics.ignored.saturating_add(1);
                }
                Some(Err(err)) => {
                    self.diagnostics.count(err);
                    warn!("sentence dropped: {}", err);
                }
            }
        }
    }

    fn handle_fix(&mut self, fix: Fix) {
        if !fix.valid {
            if self.current_fix.take().is_some() {
                info!("fix lost");
            }
            self.diagnostics.no_fix = self.diagnostics.no_fix.saturating_add(1);
            return;
        }
        if self.current_fix.is_none() {
            info!("fix acquired");
        }
        self.diagnostics.fixes = self.diagnostics.fixes.saturating_add(1);
        self.current_fix = Some(fix);
        self.tracker.ingest(&fix);
    }

    /// Lays out the current path with a stats line in the corner.
    pub fn render(&mut self) -> DrawCommands<N> {
        let mut commands = self.renderer.render(self.tracker.path(), self.display);
        let d = &self.diagnostics;
        let lost = self.tracker.stats().lost_records;
        let points = self.tracker.path().len();
        match &self.current_fix {
            Some(fix) => {
                let t = fix.timestamp;
                commands.set_overlay(format_args!(
                    "{:02}:{:02}:{:02} {}/{} err {} lost {}",
                    t.hour(),
                    t.minute(),
                    t.second(),
                    points,
                    N,
                    d.parse_errors(),
                    lost
                ));
            }
            None => commands.set_overlay(format_args!(
                "NO FIX {}/{} err {} lost {}",
                points,
                N,
                d.parse_errors(),
                lost
            )),
        }
        commands
    }

    /// One scheduler period: ingest what arrived, then draw.
    pub fn tick(&mut self, bytes: impl IntoIterator<Item = u8>) -> DrawCommands<N> {
        self.feed(bytes);
        self.render()
    }

    /// Reports whether the fix came or went since the previous call. A fix
    /// lost and regained in between reports nothing.
    pub fn take_fix_change(&mut self) -> Option<FixChange> {
        let has_fix = self.current_fix.is_some();
        if has_fix == self.announced_fix {
            return None;
        }
        self.announced_fix = has_fix;
        Some(if has_fix { FixChange::Acquired } else { FixChange::Lost })
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn tracker(&self) -> &PathTracker<S, N> {
        &self.tracker
    }

    pub fn current_fix(&self) -> Option<&Fix> {
        self.current_fix.as_ref()
    }

    pub fn viewport(&self) -> Option<&ViewportState> {
        self.renderer.viewport()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.tracker.sink_mut()
    }
}
