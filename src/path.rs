//! Bounded path history and the tracker that fills it.

use chrono::{DateTime, Utc};

use crate::{
    config::TrackerConfig,
    geo::Origin,
    nmea::Fix,
    sink::{FixRecord, RecordSink},
};

/// A fix in local metres east (`x`) and north (`y`) of the origin.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct PathPoint {
    pub x: f32,
    pub y: f32,
    pub timestamp: DateTime<Utc>,
}

impl PathPoint {
    pub fn distance_sq(&self, other: &PathPoint) -> f32 {
        let (dx, dy) = (self.x - other.x, self.y - other.y);
        dx * dx + dy * dy
    }
}

/// Fixed-capacity FIFO of path points. Push at the back; when full the
/// oldest point is overwritten.
#[derive(Debug, Clone)]
pub struct PathBuffer<const N: usize> {
    buf: [PathPoint; N],
    // Index of the oldest point
    head: usize,
    len: usize,
}

impl<const N: usize> Default for PathBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PathBuffer<N> {
    const NON_EMPTY: () = assert!(N > 0, "path buffer needs room for at least one point");

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_EMPTY;
        Self {
            buf: [PathPoint::default(); N],
            head: 0,
            len: 0,
        }
    }

    /// Appends a point, returning the evicted oldest point if the buffer was full.
    pub fn push(&mut self, point: PathPoint) -> Option<PathPoint> {
        if self.len == N {
            let evicted = core::mem::replace(&mut self.buf[self.head], point);
            self.head = (self.head + 1) % N;
            Some(evicted)
        } else {
            self.buf[(self.head + self.len) % N] = point;
            self.len += 1;
            None
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Point `i` in insertion order, 0 being the oldest.
    pub fn get(&self, i: usize) -> Option<&PathPoint> {
        (i < self.len).then(|| &self.buf[(self.head + i) % N])
    }

    pub fn oldest(&self) -> Option<&PathPoint> {
        self.get(0)
    }

    pub fn newest(&self) -> Option<&PathPoint> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PathPoint> + ExactSizeIterator + '_ {
        (0..self.len).map(move |i| &self.buf[(self.head + i) % N])
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PointOutcome {
    Appended { evicted: bool },
    /// Closer to the previous point than the movement threshold.
    Deduplicated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordOutcome {
    Stored,
    Lost,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IngestReport {
    pub point: PointOutcome,
    pub record: RecordOutcome,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackerStats {
    pub appended: u32,
    pub deduplicated: u32,
    pub evicted: u32,
    pub stored_records: u32,
    pub lost_records: u32,
}

/// Turns valid fixes into path points and forwards every one of them to the
/// record sink.
pub struct PathTracker<S, const N: usize> {
    config: TrackerConfig,
    origin: Option<Origin>,
    path: PathBuffer<N>,
    sink: S,
    stats: TrackerStats,
}

impl<S: RecordSink, const N: usize> PathTracker<S, N> {
    pub fn new(config: TrackerConfig, sink: S) -> Self {
        Self {
            config,
            origin: None,
            path: PathBuffer::new(),
            sink,
            stats: TrackerStats::default(),
        }
    }

    /// Invalid fixes leave the tracker untouched and return `None`.
    pub fn ingest(&mut self, fix: &Fix) -> Option<IngestReport> {
        if !fix.valid {
            return None;
        }

        let origin = *self.origin.get_or_insert_with(|| {
            info!("path origin set at {} {}", fix.position.lat, fix.position.lon);
            Origin::new(fix.position)
        });
        let (x, y) = origin.project(fix.position);
        let point = PathPoint {
            x,
            y,
            timestamp: fix.timestamp,
        };

        let min = self.config.min_movement_m;
        let point_outcome = match self.path.newest() {
            Some(last) if last.distance_sq(&point) < min * min => {
                self.stats.deduplicated = self.stats.deduplicated.saturating_add(1);
                PointOutcome::Deduplicated
            }
            _ => {
                let evicted = self.path.push(point).is_some();
                self.stats.appended = self.stats.appended.saturating_add(1);
                if evicted {
                    self.stats.evicted = self.stats.evicted.saturating_add(1);
                }
                trace!("point {} at {} {}", self.path.len(), x, y);
                PointOutcome::Appended { evicted }
            }
        };

        Some(IngestReport {
            point: point_outcome,
            record: self.forward(fix),
        })
    }

    fn forward(&mut self, fix: &Fix) -> RecordOutcome {
        let record = FixRecord::from(fix);
        for _ in 0..self.config.sink_attempts.max(1) {
            match self.sink.append(&record) {
                Ok(()) => {
                    self.stats.stored_records = self.stats.stored_records.saturating_add(1);
                    return RecordOutcome::Stored;
                }
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(_)) => break,
            }
        }
        self.stats.lost_records = self.stats.lost_records.saturating_add(1);
        warn!("fix record dropped, {} lost so far", self.stats.lost_records);
        RecordOutcome::Lost
    }

    pub fn path(&self) -> &PathBuffer<N> {
        &self.path
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests;
