//! NMEA 0183 sentence parser.
//!
//! Bytes are fed one at a time; a complete, checksummed frame is decoded into
//! a [`Sentence`]. Only GGA and RMC carry positions for us, every other
//! sentence decodes to [`Sentence::Other`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use tinyvec::ArrayVec;

use crate::Position;

/// Longest payload between `$` and `*`; NMEA limits a whole sentence to 82 bytes.
pub const NMEA_BUF_SIZE: usize = 80;
const MAX_FIELDS: usize = 24;
const HALF_DAY_SECS: u32 = 12 * 60 * 60;

type NmeaBuf = ArrayVec<[u8; NMEA_BUF_SIZE]>;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    #[error("frame exceeded the line buffer")]
    FrameOverflow,
    #[error("checksum mismatch: expected {expected:02X}, found {found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },
    #[error("malformed field")]
    MalformedField,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SentenceKind {
    Gga,
    Rmc,
}

/// One resolved receiver reading.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fix {
    pub position: Position,
    /// Metres above mean sea level, GGA only.
    pub altitude_m: Option<f32>,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub kind: SentenceKind,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Sentence {
    Fix(Fix),
    /// A well-formed sentence we do not decode.
    Other,
}

// States are named for the portion of the frame currently being read
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ParserState {
    Idle,
    Payload { checksum: u8 },
    Checksum { expected: u8, high: Option<u8> },
    Terminator,
}
use ParserState::*;

/// What the parser must do with its line buffer after a transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    /// Start of a frame: clear the buffer.
    Begin,
    Push(u8),
    /// Drop the current frame and report why.
    Discard(ParseError),
    /// Drop the current frame, report it, and start a new one.
    Restart(ParseError),
    /// Checksum verified and terminator seen: decode the buffer.
    Complete,
}

impl ParserState {
    /// Pure transition function. `buffered` is the number of payload bytes
    /// already held for the current frame.
    pub(crate) fn step(self, b: u8, buffered: usize) -> (ParserState, Action) {
        match self {
            Idle => match b {
                b'$' => (Payload { checksum: 0 }, Action::Begin),
                _ => (Idle, Action::None),
            },
            Payload { checksum } => match b {
                b'$' => (Payload { checksum: 0 }, Action::Restart(ParseError::MalformedField)),
                b'*' => (
                    Checksum {
                        expected: checksum,
                        high: None,
                    },
                    Action::None,
                ),
                b'\r' | b'\n' => (Idle, Action::Discard(ParseError::MalformedField)),
                _ if buffered >= NMEA_BUF_SIZE => (Idle, Action::Discard(ParseError::FrameOverflow)),
                _ => (
                    Payload {
                        checksum: checksum ^ b,
                    },
                    Action::Push(b),
                ),
            },
            Checksum { expected, high } => match (b, hex_value(b), high) {
                (b'$', _, _) => (Payload { checksum: 0 }, Action::Restart(ParseError::MalformedField)),
                (_, None, _) => (Idle, Action::Discard(ParseError::MalformedField)),
                (_, Some(nibble), None) => (
                    Checksum {
                        expected,
                        high: Some(nibble),
                    },
                    Action::None,
                ),
                (_, Some(nibble), Some(high)) => {
                    let found = high << 4 | nibble;
                    if found == expected {
                        (Terminator, Action::None)
                    } else {
                        (Idle, Action::Discard(ParseError::ChecksumMismatch { expected, found }))
                    }
                }
            },
            Terminator => match b {
                b'\r' => (Terminator, Action::None),
                b'\n' => (Idle, Action::Complete),
                b'$' => (Payload { checksum: 0 }, Action::Restart(ParseError::MalformedField)),
                _ => (Idle, Action::Discard(ParseError::MalformedField)),
            },
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Date tracking for sentences that only carry a time of day.
#[derive(Debug, Default, Copy, Clone)]
struct Clock {
    /// Last date seen in an RMC sentence.
    date: NaiveDate,
    last_time: Option<NaiveTime>,
}

impl Clock {
    /// Combines a time of day with the best known date, keeping timestamps
    /// non-decreasing across UTC midnight.
    fn stamp(&mut self, time: NaiveTime, date: Option<NaiveDate>) -> DateTime<Utc> {
        match date {
            Some(date) => self.date = date,
            None => {
                if let Some(last) = self.last_time {
                    let (now, then) = (time.num_seconds_from_midnight(), last.num_seconds_from_midnight());
                    if then > now + HALF_DAY_SECS {
                        self.date = self.date.succ_opt().unwrap_or(self.date);
                        debug!("utc rollover, advancing date");
                    }
                }
            }
        }
        self.last_time = Some(time);
        DateTime::from_naive_utc_and_offset(NaiveDateTime::new(self.date, time), Utc)
    }

    /// Stamp for a sentence without a time of day. The clock does not move.
    fn last_known(&mut self, date: Option<NaiveDate>) -> DateTime<Utc> {
        if let Some(date) = date {
            self.date = date;
        }
        let time = self.last_time.unwrap_or(NaiveTime::MIN);
        DateTime::from_naive_utc_and_offset(NaiveDateTime::new(self.date, time), Utc)
    }

    /// Receivers leave the time empty until they have one; that is only
    /// acceptable while they also report no fix.
    fn stamp_field(&mut self, raw: &str, date: Option<NaiveDate>, valid: bool) -> Result<DateTime<Utc>, ParseError> {
        match raw {
            "" if !valid => Ok(self.last_known(date)),
            raw => Ok(self.stamp(parse_time(raw)?, date)),
        }
    }
}

pub struct NmeaParser {
    state: ParserState,
    buf: NmeaBuf,
    clock: Clock,
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NmeaParser {
    pub fn new() -> Self {
        Self {
            state: Idle,
            buf: NmeaBuf::new(),
            clock: Clock::default(),
        }
    }

    pub fn process_byte(&mut self, b: u8) -> Option<Result<Sentence, ParseError>> {
        let (next, action) = self.state.step(b, self.buf.len());
        self.state = next;
        match action {
            Action::None => None,
            Action::Begin => {
                self.buf.clear();
                None
            }
            Action::Push(b) => {
                // Capacity was checked by the transition
                let _ = self.buf.try_push(b);
                None
            }
            Action::Discard(e) | Action::Restart(e) => {
                trace!("dropping frame after {} bytes", self.buf.len());
                self.buf.clear();
                Some(Err(e))
            }
            Action::Complete => {
                let r = self.decode();
                self.buf.clear();
                Some(r)
            }
        }
    }

    /// Feeds a chunk of bytes, yielding every event it completes.
    pub fn process<'a, I>(&'a mut self, bytes: I) -> impl Iterator<Item = Result<Sentence, ParseError>> + 'a
    where
        I: IntoIterator<Item = u8>,
        I::IntoIter: 'a,
    {
        bytes.into_iter().filter_map(move |b| self.process_byte(b))
    }

    fn decode(&mut self) -> Result<Sentence, ParseError> {
        let line = core::str::from_utf8(&self.buf).map_err(|_| ParseError::MalformedField)?;
        if !line.is_ascii() {
            return Err(ParseError::MalformedField);
        }
        let fields: ArrayVec<[&str; MAX_FIELDS]> = line.split(',').take(MAX_FIELDS).collect();
        let id = fields.first().copied().unwrap_or("");
        // Two-character talker followed by the sentence formatter
        if id.len() != 5 {
            return Ok(Sentence::Other);
        }
        match &id[2..] {
            "GGA" => decode_gga(&fields, &mut self.clock).map(Sentence::Fix),
            "RMC" => decode_rmc(&fields, &mut self.clock).map(Sentence::Fix),
            _ => Ok(Sentence::Other),
        }
    }
}

// $--GGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,a.a,M,...
fn decode_gga(fields: &[&str], clock: &mut Clock) -> Result<Fix, ParseError> {
    let quality = match field(fields, 6) {
        "" => 0,
        q => q.parse::<u8>().map_err(|_| ParseError::MalformedField)?,
    };
    let valid = quality != 0;
    let position = parse_position(fields, 2, valid)?;
    let altitude_m = field(fields, 9).parse::<f32>().ok().filter(|a| a.is_finite());

    Ok(Fix {
        position,
        altitude_m,
        timestamp: clock.stamp_field(field(fields, 1), None, valid)?,
        valid,
        kind: SentenceKind::Gga,
    })
}

// $--RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,ddmmyy,...
fn decode_rmc(fields: &[&str], clock: &mut Clock) -> Result<Fix, ParseError> {
    let valid = field(fields, 2) == "A";
    let position = parse_position(fields, 3, valid)?;
    let date = match field(fields, 9) {
        "" => None,
        d => Some(parse_date(d)?),
    };

    Ok(Fix {
        position,
        altitude_m: None,
        timestamp: clock.stamp_field(field(fields, 1), date, valid)?,
        valid,
        kind: SentenceKind::Rmc,
    })
}

fn field<'a>(fields: &[&'a str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or("")
}

/// Reads `lat,N/S,lon,E/W` starting at `at`. Coordinates are mandatory for a
/// valid fix; for an invalid one anything unreadable becomes the zero position.
fn parse_position(fields: &[&str], at: usize, required: bool) -> Result<Position, ParseError> {
    let parsed = parse_coordinate(field(fields, at), field(fields, at + 1), b'N', b'S', 90).and_then(|lat| {
        parse_coordinate(field(fields, at + 2), field(fields, at + 3), b'E', b'W', 180).map(|lon| Position { lat, lon })
    });
    match parsed {
        Ok(p) => Ok(p),
        Err(e) if required => Err(e),
        Err(_) => Ok(Position::default()),
    }
}

/// `dddmm.mmmm` plus hemisphere letter to signed degrees.
fn parse_coordinate(raw: &str, hemisphere: &str, positive: u8, negative: u8, max_degrees: u32) -> Result<f64, ParseError> {
    let dot = raw.find('.').unwrap_or(raw.len());
    if dot < 3 || !raw.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Err(ParseError::MalformedField);
    }
    let degrees = raw[..dot - 2].parse::<u32>().map_err(|_| ParseError::MalformedField)?;
    let minutes = raw[dot - 2..].parse::<f64>().map_err(|_| ParseError::MalformedField)?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(ParseError::MalformedField);
    }
    let value = degrees as f64 + minutes / 60.0;
    if value > max_degrees as f64 {
        return Err(ParseError::MalformedField);
    }
    match hemisphere.as_bytes() {
        [h] if *h == positive => Ok(value),
        [h] if *h == negative => Ok(-value),
        _ => Err(ParseError::MalformedField),
    }
}

/// `hhmmss` with an optional fraction of a second.
fn parse_time(raw: &str) -> Result<NaiveTime, ParseError> {
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedField);
    }
    let two = |i: usize| whole[i..i + 2].parse::<u32>().map_err(|_| ParseError::MalformedField);
    let milli = frac
        .bytes()
        .chain(core::iter::repeat(b'0'))
        .take(3)
        .fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32);
    NaiveTime::from_hms_milli_opt(two(0)?, two(2)?, two(4)?, milli).ok_or(ParseError::MalformedField)
}

/// `ddmmyy`, years taken as 20yy.
fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::MalformedField);
    }
    let two = |i: usize| raw[i..i + 2].parse::<u32>().map_err(|_| ParseError::MalformedField);
    NaiveDate::from_ymd_opt(2000 + two(4)? as i32, two(2)?, two(0)?).ok_or(ParseError::MalformedField)
}
