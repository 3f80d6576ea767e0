#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};
use tinyvec::ArrayVec;

#[macro_use]
mod macros;

pub mod buzzer;
pub mod config;
pub mod display;
pub mod engine;
pub mod geo;
pub mod nmea;
pub mod path;
pub mod rb;
pub mod sink;
pub mod surface;
pub mod viewport;

pub use buzzer::{Buzzer, Note, SetFrequency};
pub use config::{Config, ConfigError, RenderConfig, TrackerConfig};
pub use engine::{Diagnostics, FixChange, TrailEngine};
pub use nmea::{Fix, NmeaParser, ParseError, Sentence, SentenceKind};
pub use path::{PathBuffer, PathPoint, PathTracker};
pub use sink::{FixRecord, NullSink, RecordSink};
pub use surface::DisplaySurface;
pub use viewport::{DrawCommand, DrawCommands, ViewportRenderer, ViewportState};

/// Fixed-capacity text buffer for formatting without an allocator.
///
/// Text that does not fit is cut at the last whole character.
#[derive(Debug, Default, Clone)]
pub struct FmtBuf<const N: usize = 256>(pub ArrayVec<[u8; N]>);

impl<const N: usize> Write for FmtBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            let mut utf8 = [0u8; 4];
            let bytes = c.encode_utf8(&mut utf8).as_bytes();
            if self.0.len() + bytes.len() > N {
                break;
            }
            self.0.extend_from_slice(bytes);
        }
        Ok(())
    }
}

impl<const N: usize> FmtBuf<N> {
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.0.as_slice()).ok()
    }

    pub fn new() -> Self {
        Self(Default::default())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// This isn't in core for some reason, so do this to avoid pulling in a dependency
pub trait Abs {
    fn abs(self) -> Self;
}

impl Abs for f32 {
    fn abs(self) -> Self {
        f32::from_bits(self.to_bits() & 0x7fff_ffff)
    }
}

impl Abs for f64 {
    fn abs(self) -> Self {
        f64::from_bits(self.to_bits() & 0x7fff_ffff_ffff_ffff)
    }
}

/// Geographic coordinates in degrees, north and east positive.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}
