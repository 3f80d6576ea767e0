//! Local equirectangular projection around a fixed origin.

use crate::Position;

/// Mean earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;
const DEG_TO_RAD: f64 = core::f64::consts::PI / 180.0;

/// Reference point of the local metric plane. Chosen once, never moved.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Origin {
    position: Position,
    /// Metres per degree of longitude at the origin's latitude.
    lon_scale: f64,
}

impl Origin {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            lon_scale: EARTH_RADIUS_M * DEG_TO_RAD * cos_deg(position.lat),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Metres east and north of the origin.
    pub fn project(&self, p: Position) -> (f32, f32) {
        let mut dlon = p.lon - self.position.lon;
        // Shortest way round the antimeridian
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        let dlat = p.lat - self.position.lat;
        (
            (dlon * self.lon_scale) as f32,
            (dlat * EARTH_RADIUS_M * DEG_TO_RAD) as f32,
        )
    }
}

/// Cosine of a latitude in degrees.
///
/// Latitudes are within ±90°, so the Taylor series converges without range
/// reduction; eight terms keep the error below 1e-12.
pub fn cos_deg(deg: f64) -> f64 {
    let x = deg * DEG_TO_RAD;
    let x2 = x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    for n in 1..=8u32 {
        term *= -x2 / f64::from((2 * n - 1) * (2 * n));
        sum += term;
    }
    sum.max(0.0)
}
