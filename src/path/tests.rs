use super::*;
use crate::{
    nmea::SentenceKind,
    sink::{NullSink, RecordSink},
    Position,
};
use chrono::{DateTime, TimeZone, Utc};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn fix(lat: f64, lon: f64, secs: i64) -> Fix {
    Fix {
        position: Position::new(lat, lon),
        altitude_m: None,
        timestamp: at(secs),
        valid: true,
        kind: SentenceKind::Rmc,
    }
}

fn point(x: f32) -> PathPoint {
    PathPoint {
        x,
        y: 0.0,
        timestamp: at(0),
    }
}

fn config(min_movement_m: f32) -> TrackerConfig {
    TrackerConfig {
        min_movement_m,
        sink_attempts: 3,
    }
}

/// Keeps every record; optionally refuses a number of attempts first.
#[derive(Default)]
struct VecSink {
    records: Vec<FixRecord>,
    busy_for: usize,
    broken: bool,
    attempts: usize,
}

impl RecordSink for VecSink {
    type Error = ();

    fn append(&mut self, record: &FixRecord) -> nb::Result<(), ()> {
        self.attempts += 1;
        if self.broken {
            return Err(nb::Error::Other(()));
        }
        if self.busy_for > 0 {
            self.busy_for -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.records.push(*record);
        Ok(())
    }
}

#[test]
fn buffer_evicts_oldest_first() {
    let mut buf = PathBuffer::<3>::new();
    assert_eq!(buf.push(point(1.0)), None);
    assert_eq!(buf.push(point(2.0)), None);
    assert_eq!(buf.push(point(3.0)), None);
    assert!(buf.is_full());
    assert_eq!(buf.push(point(4.0)).map(|p| p.x), Some(1.0));
    assert_eq!(buf.push(point(5.0)).map(|p| p.x), Some(2.0));

    let xs: Vec<f32> = buf.iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![3.0, 4.0, 5.0]);
    assert_eq!(buf.oldest().map(|p| p.x), Some(3.0));
    assert_eq!(buf.newest().map(|p| p.x), Some(5.0));
    assert_eq!(buf.get(3), None);
}

#[test]
fn buffer_never_exceeds_capacity() {
    let mut buf = PathBuffer::<4>::new();
    for i in 0..50 {
        buf.push(point(i as f32));
        assert!(buf.len() <= buf.capacity());
        assert_eq!(buf.newest().map(|p| p.x), Some(i as f32));
    }
    let xs: Vec<f32> = buf.iter().rev().map(|p| p.x).collect();
    assert_eq!(xs, vec![49.0, 48.0, 47.0, 46.0]);
}

#[test]
fn single_slot_buffer_keeps_newest() {
    let mut buf = PathBuffer::<1>::new();
    buf.push(point(1.0));
    buf.push(point(2.0));
    assert_eq!(buf.len(), 1);
    assert_eq!(buf.newest().map(|p| p.x), Some(2.0));
}

#[test]
fn first_fix_becomes_origin() {
    let mut tracker = PathTracker::<_, 8>::new(config(5.0), NullSink);
    let report = tracker.ingest(&fix(47.0, 8.0, 0)).unwrap();
    assert_eq!(report.point, PointOutcome::Appended { evicted: false });
    assert_eq!(tracker.origin().map(|o| o.position()), Some(Position::new(47.0, 8.0)));

    let p = tracker.path().newest().unwrap();
    assert_eq!((p.x, p.y), (0.0, 0.0));

    // The origin stays put
    tracker.ingest(&fix(47.1, 8.1, 1));
    assert_eq!(tracker.origin().map(|o| o.position()), Some(Position::new(47.0, 8.0)));
}

#[test]
fn invalid_fix_changes_nothing() {
    let mut sink = VecSink::default();
    let mut tracker = PathTracker::<_, 8>::new(config(5.0), &mut sink);
    let mut no_fix = fix(10.0, 10.0, 0);
    no_fix.valid = false;

    assert_eq!(tracker.ingest(&no_fix), None);
    assert!(tracker.origin().is_none());
    assert!(tracker.path().is_empty());
    assert_eq!(*tracker.stats(), TrackerStats::default());
    drop(tracker);
    assert_eq!(sink.attempts, 0);
}

#[test]
fn dedup_threshold_is_a_parameter() {
    // 0.0001° of longitude at the equator is about 11.1 m
    for (threshold, expected) in [(5.0, 2), (11.0, 2), (12.0, 1), (50.0, 1)] {
        let mut tracker = PathTracker::<_, 8>::new(config(threshold), NullSink);
        tracker.ingest(&fix(0.0, 0.0, 0));
        tracker.ingest(&fix(0.0, 0.0001, 1));
        assert_eq!(tracker.path().len(), expected, "threshold {}", threshold);
    }
}

#[test]
fn dedup_compares_against_last_retained_point() {
    let mut tracker = PathTracker::<_, 8>::new(config(20.0), NullSink);
    tracker.ingest(&fix(0.0, 0.0, 0));
    // Three ~11 m steps: the second crosses 20 m from the origin
    assert_eq!(
        tracker.ingest(&fix(0.0, 0.0001, 1)).map(|r| r.point),
        Some(PointOutcome::Deduplicated)
    );
    assert_eq!(
        tracker.ingest(&fix(0.0, 0.0002, 2)).map(|r| r.point),
        Some(PointOutcome::Appended { evicted: false })
    );
    assert_eq!(
        tracker.ingest(&fix(0.0, 0.0003, 3)).map(|r| r.point),
        Some(PointOutcome::Deduplicated)
    );
    assert_eq!(tracker.path().len(), 2);
    assert_eq!(tracker.stats().deduplicated, 2);
}

#[test]
fn every_valid_fix_is_recorded_even_when_deduplicated() {
    let mut sink = VecSink::default();
    let mut tracker = PathTracker::<_, 8>::new(config(100.0), &mut sink);
    tracker.ingest(&fix(1.0, 1.0, 0));
    tracker.ingest(&fix(1.0, 1.0, 1));
    tracker.ingest(&fix(1.0, 1.0, 2));
    assert_eq!(tracker.path().len(), 1);
    assert_eq!(tracker.stats().stored_records, 3);
    drop(tracker);

    assert_eq!(sink.records.len(), 3);
    assert!(sink.records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn busy_sink_is_retried_within_budget() {
    let mut sink = VecSink {
        busy_for: 2,
        ..Default::default()
    };
    let mut tracker = PathTracker::<_, 8>::new(config(5.0), &mut sink);
    let report = tracker.ingest(&fix(1.0, 1.0, 0)).unwrap();
    assert_eq!(report.record, RecordOutcome::Stored);
    drop(tracker);
    assert_eq!(sink.attempts, 3);
    assert_eq!(sink.records.len(), 1);
}

#[test]
fn sink_failures_are_counted_not_fatal() {
    let mut sink = VecSink {
        busy_for: 10,
        ..Default::default()
    };
    let mut tracker = PathTracker::<_, 8>::new(config(5.0), &mut sink);
    let report = tracker.ingest(&fix(1.0, 1.0, 0)).unwrap();
    assert_eq!(report.record, RecordOutcome::Lost);
    assert_eq!(report.point, PointOutcome::Appended { evicted: false });
    assert_eq!(tracker.stats().lost_records, 1);
    assert_eq!(tracker.path().len(), 1);

    tracker.sink_mut().broken = true;
    let report = tracker.ingest(&fix(1.0, 1.1, 1)).unwrap();
    assert_eq!(report.record, RecordOutcome::Lost);
    assert_eq!(tracker.stats().lost_records, 2);
    assert_eq!(tracker.path().len(), 2);
    drop(tracker);
    // Three busy attempts, then one hard failure without retry
    assert_eq!(sink.attempts, 4);
}

#[test]
fn keeps_last_n_in_arrival_order() {
    let mut tracker = PathTracker::<_, 4>::new(config(5.0), NullSink);
    for i in 0..9 {
        tracker.ingest(&fix(0.0, i as f64 * 0.001, i));
    }
    let stamps: Vec<DateTime<Utc>> = tracker.path().iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![at(5), at(6), at(7), at(8)]);
    assert_eq!(tracker.stats().evicted, 5);
}

#[test]
fn stats_stop_at_their_ceiling() {
    let full = TrackerStats {
        appended: u32::MAX,
        deduplicated: u32::MAX,
        evicted: u32::MAX,
        stored_records: u32::MAX,
        lost_records: u32::MAX,
    };
    let mut tracker = PathTracker::<_, 1>::new(config(5.0), VecSink::default());
    tracker.stats = full;
    tracker.ingest(&fix(0.0, 0.0, 0));
    // Deduplicated, then appended over the only slot
    tracker.ingest(&fix(0.0, 0.0, 1));
    tracker.ingest(&fix(0.0, 0.01, 2));
    tracker.sink_mut().broken = true;
    tracker.ingest(&fix(0.0, 0.02, 3));

    assert_eq!(tracker.path().len(), 1);
    assert_eq!(tracker.sink().records.len(), 3);
    assert_eq!(*tracker.stats(), full);
}
