//! Durable fix log interface and its flat record layout.

use bytemuck::{Pod, PodCastError, Zeroable};

use crate::nmea::Fix;

pub const ALTITUDE_UNKNOWN: i32 = i32::MIN;

/// One fix as stored by a [`RecordSink`]: 24 bytes, little endian on our
/// targets, appended back to back.
// Layout: every field is naturally aligned and `reserved` fills the tail up to
// the 8-byte alignment, leaving no implicit padding.
#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixRecord {
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    pub lat_e7: i32,
    pub lon_e7: i32,
    /// Millimetres above mean sea level, or [`ALTITUDE_UNKNOWN`].
    pub alt_mm: i32,
    pub valid: u8,
    pub reserved: [u8; 3],
}

impl FixRecord {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PodCastError> {
        bytemuck::try_pod_read_unaligned(bytes)
    }

    pub fn lat_degrees(&self) -> f64 {
        self.lat_e7 as f64 * 1e-7
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon_e7 as f64 * 1e-7
    }
}

impl From<&Fix> for FixRecord {
    fn from(fix: &Fix) -> Self {
        Self {
            timestamp: fix.timestamp.timestamp(),
            lat_e7: round(fix.position.lat * 1e7) as i32,
            lon_e7: round(fix.position.lon * 1e7) as i32,
            alt_mm: fix
                .altitude_m
                .map(|a| round(a as f64 * 1e3) as i32)
                .unwrap_or(ALTITUDE_UNKNOWN),
            valid: fix.valid as u8,
            reserved: [0; 3],
        }
    }
}

fn round(v: f64) -> f64 {
    if v >= 0.0 {
        v + 0.5
    } else {
        v - 0.5
    }
}

/// Append-only consumer of fix records.
///
/// `WouldBlock` means "busy, try again"; the tracker retries a bounded number
/// of times within one tick and then counts the record as lost.
pub trait RecordSink {
    type Error;

    fn append(&mut self, record: &FixRecord) -> nb::Result<(), Self::Error>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    type Error = S::Error;

    fn append(&mut self, record: &FixRecord) -> nb::Result<(), Self::Error> {
        (**self).append(record)
    }
}

/// Accepts and discards everything, for builds without storage.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullSink;

impl RecordSink for NullSink {
    type Error = core::convert::Infallible;

    fn append(&mut self, _record: &FixRecord) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{nmea::SentenceKind, Position};
    use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

    fn fix(lat: f64, lon: f64, altitude_m: Option<f32>) -> Fix {
        let naive = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        Fix {
            position: Position::new(lat, lon),
            altitude_m,
            timestamp: DateTime::from_naive_utc_and_offset(naive, Utc),
            valid: true,
            kind: SentenceKind::Gga,
        }
    }

    #[test]
    fn record_layout_is_flat() {
        assert_eq!(FixRecord::SIZE, 24);
    }

    #[test]
    fn converts_fix() {
        let record = FixRecord::from(&fix(-33.8688197, 151.2092955, Some(58.25)));
        assert_eq!(record.lat_e7, -338_688_197);
        assert_eq!(record.lon_e7, 1_512_092_955);
        assert_eq!(record.alt_mm, 58_250);
        assert_eq!(record.valid, 1);
        assert_eq!(record.timestamp, 1_714_557_600);
    }

    #[test]
    fn degrees_round_trip_through_fixed_point() {
        let record = FixRecord::from(&fix(-33.8688197, 151.2092955, None));
        assert!((record.lat_degrees() + 33.8688197).abs() < 1e-7);
        assert!((record.lon_degrees() - 151.2092955).abs() < 1e-7);
    }

    #[test]
    fn unknown_altitude_uses_sentinel() {
        let record = FixRecord::from(&fix(1.0, 2.0, None));
        assert_eq!(record.alt_mm, ALTITUDE_UNKNOWN);
    }

    #[test]
    fn reads_back_from_unaligned_stream() {
        let record = FixRecord::from(&fix(48.1173, 11.5166, Some(545.4)));
        let mut stream = vec![0xAAu8];
        stream.extend_from_slice(record.as_bytes());
        assert_eq!(FixRecord::from_bytes(&stream[1..]), Ok(record));
        assert!(FixRecord::from_bytes(&stream[1..10]).is_err());
    }
}
