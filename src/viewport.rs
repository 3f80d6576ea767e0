//! Maps the path onto the display with automatic zoom and scroll.
//!
//! Every frame computes a candidate viewport from scratch: the bounding box of
//! the whole path, a scale that fits it inside the margins, and the box centre.
//! The candidate only replaces the stored viewport when the scale moved by more
//! than the rescale threshold or the newest point is about to leave the frame,
//! so small movements do not make the picture jitter. A replacement leaves
//! `lead` of room ahead of the newest point, otherwise a steady walk would sit
//! on the margin line and trip the edge rule on every step.

use core::fmt::{self, Write};

use embedded_graphics::prelude::{Point, Size};
use tinyvec::ArrayVec;

use crate::{
    config::RenderConfig,
    path::{PathBuffer, PathPoint},
    Abs, FmtBuf,
};

pub const PLACEHOLDER_TEXT: &str = "NO FIX";
const OVERLAY_LEN: usize = 64;

/// Axis-aligned box in local metres.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoundingBox {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn around<'a>(points: impl IntoIterator<Item = &'a PathPoint>) -> Option<Self> {
        points.into_iter().fold(None, |bbox, p| {
            Some(match bbox {
                None => Self {
                    min_x: p.x,
                    max_x: p.x,
                    min_y: p.y,
                    max_y: p.y,
                },
                Some(b) => Self {
                    min_x: b.min_x.min(p.x),
                    max_x: b.max_x.max(p.x),
                    min_y: b.min_y.min(p.y),
                    max_y: b.max_y.max(p.y),
                },
            })
        })
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.min_x && self.max_x >= other.max_x && self.min_y <= other.min_y && self.max_y >= other.max_y
    }
}

/// Where the world sits on the display for the current frame.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ViewportState {
    /// Bounding box of the whole path this frame.
    pub bbox: BoundingBox,
    /// Pixels per metre.
    pub scale: f32,
    /// World position drawn at the middle of the display.
    pub center: (f32, f32),
    pub width: u32,
    pub height: u32,
}

impl ViewportState {
    /// World metres to display pixels; y grows downwards on the display.
    pub fn to_pixel(&self, x: f32, y: f32) -> Point {
        let px = self.width as f32 / 2.0 + (x - self.center.0) * self.scale;
        let py = self.height as f32 / 2.0 - (y - self.center.1) * self.scale;
        Point::new(round_px(px), round_px(py))
    }

    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

fn round_px(v: f32) -> i32 {
    // `as` saturates, so far off-screen points clamp instead of wrapping
    if v >= 0.0 {
        (v + 0.5) as i32
    } else {
        (v - 0.5) as i32
    }
}

/// One primitive for the display surface.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DrawCommand<'a> {
    /// Connected line through the points in order.
    Polyline(&'a [Point]),
    /// The live position.
    Marker(Point),
    /// Text with its top-left corner at `origin`.
    Text { origin: Point, text: &'a str },
}

/// The ordered draw list for one frame.
#[derive(Debug, Clone, Default)]
pub struct DrawCommands<const N: usize> {
    polyline: ArrayVec<[Point; N]>,
    marker: Option<Point>,
    placeholder: Option<Point>,
    overlay: FmtBuf<OVERLAY_LEN>,
}

impl<const N: usize> DrawCommands<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stats overlay drawn in the top-left corner.
    pub fn set_overlay(&mut self, args: fmt::Arguments) {
        self.overlay.clear();
        let _ = self.overlay.write_fmt(args);
    }

    pub fn polyline(&self) -> &[Point] {
        &self.polyline
    }

    pub fn marker(&self) -> Option<Point> {
        self.marker
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = DrawCommand<'_>> + '_ {
        let polyline = (self.polyline.len() > 1).then(|| DrawCommand::Polyline(&self.polyline));
        let marker = self.marker.map(DrawCommand::Marker);
        let placeholder = self.placeholder.map(|origin| DrawCommand::Text {
            origin,
            text: PLACEHOLDER_TEXT,
        });
        let overlay = self
            .overlay
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|text| DrawCommand::Text {
                origin: Point::new(2, 2),
                text,
            });
        polyline.into_iter().chain(marker).chain(placeholder).chain(overlay)
    }
}

pub struct ViewportRenderer {
    config: RenderConfig,
    state: Option<ViewportState>,
    // Plain fit of the box when `state` was adopted, before any lead
    fitted_scale: f32,
}

impl ViewportRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            state: None,
            fitted_scale: 0.0,
        }
    }

    /// The viewport used by the last rendered frame.
    pub fn viewport(&self) -> Option<&ViewportState> {
        self.state.as_ref()
    }

    pub fn render<const N: usize>(&mut self, path: &PathBuffer<N>, display: Size) -> DrawCommands<N> {
        let mut commands = DrawCommands::new();

        let (Some(bbox), Some(newest)) = (BoundingBox::around(path.iter()), path.newest()) else {
            self.state = None;
            // Roughly centred for a 6 px wide font
            commands.placeholder = Some(Point::new(
                display.width as i32 / 2 - 3 * PLACEHOLDER_TEXT.len() as i32,
                display.height as i32 / 2 - 5,
            ));
            return commands;
        };

        let candidate = self.fit(bbox, display);
        let state = match self.state {
            Some(prev) if prev.size() == candidate.size() => {
                if self.must_adopt(&prev, candidate.scale, newest) {
                    self.fitted_scale = candidate.scale;
                    let ahead = self.refit_ahead(&prev, bbox, newest, display);
                    debug!("viewport scale {} px/m", ahead.scale);
                    ahead
                } else {
                    ViewportState { bbox, ..prev }
                }
            }
            // First frame or a new display size
            _ => {
                self.fitted_scale = candidate.scale;
                debug!("viewport scale {} px/m", candidate.scale);
                candidate
            }
        };
        self.state = Some(state);

        for p in path.iter() {
            let px = state.to_pixel(p.x, p.y);
            if commands.polyline.last() != Some(&px) {
                commands.polyline.push(px);
            }
        }
        commands.marker = Some(state.to_pixel(newest.x, newest.y));
        commands
    }

    /// Candidate viewport centred on the box and fitted inside the margins.
    fn fit(&self, bbox: BoundingBox, display: Size) -> ViewportState {
        let c = &self.config;
        let usable = 1.0 - 2.0 * c.margin;
        let box_w = bbox.width().max(c.min_box_m);
        let box_h = bbox.height().max(c.min_box_m);
        let scale = (display.width as f32 * usable / box_w)
            .min(display.height as f32 * usable / box_h)
            .clamp(c.min_scale, c.max_scale);

        ViewportState {
            bbox,
            scale,
            center: bbox.center(),
            width: display.width,
            height: display.height,
        }
    }

    /// Fits the box stretched by `lead` on every side the newest point is
    /// pushing out.
    fn refit_ahead(&self, prev: &ViewportState, bbox: BoundingBox, newest: &PathPoint, display: Size) -> ViewportState {
        let c = &self.config;
        let mut ahead = bbox;
        // A flat axis has no direction of travel
        if bbox.width() > 0.0 {
            let lead = c.lead * bbox.width().max(c.min_box_m);
            if newest.x >= bbox.max_x {
                ahead.max_x += lead;
            } else if newest.x <= bbox.min_x {
                ahead.min_x -= lead;
            }
        }
        if bbox.height() > 0.0 {
            let lead = c.lead * bbox.height().max(c.min_box_m);
            if newest.y >= bbox.max_y {
                ahead.max_y += lead;
            } else if newest.y <= bbox.min_y {
                ahead.min_y -= lead;
            }
        }

        let mut state = self.fit(ahead, display);
        // The lead of the previous refit may reach further than this one
        if bbox.contains(&prev.bbox) {
            state.scale = state.scale.min(prev.scale);
        }
        ViewportState { bbox, ..state }
    }

    fn must_adopt(&self, prev: &ViewportState, scale: f32, newest: &PathPoint) -> bool {
        if Abs::abs(scale - self.fitted_scale) > self.config.rescale_threshold * self.fitted_scale {
            return true;
        }
        // The live position must stay clear of the margin band
        let p = prev.to_pixel(newest.x, newest.y);
        let margin_x = (prev.width as f32 * self.config.margin) as i32;
        let margin_y = (prev.height as f32 * self.config.margin) as i32;
        let inside = p.x >= margin_x
            && p.x <= prev.width as i32 - margin_x
            && p.y >= margin_y
            && p.y <= prev.height as i32 - margin_y;
        !inside
    }
}
