//! Timing primitives and musical-time conversion.
//!
//! This module provides the fundamental timing types used by the engine:
//!
//! - [`BeatTime`] - Fixed-point beat representation for exact callback ordering
//! - [`TimeSignature`] - Musical time signature (e.g., 4/4, 3/4)
//! - [`MusicalTime`] - A parsed musical-time expression ("4n", "1:2:3", "0.5")
//! - [`TimeContext`] - Tempo and signature used to turn musical time into seconds

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ticks per quarter note used by the `i` suffix.
pub const PPQ: u64 = 192;

/// Default duration of a single played note.
pub const DEFAULT_NOTE_DURATION: MusicalTime = MusicalTime::Note { division: 8, dotted: false };

/// Default duration of a played chord.
pub const DEFAULT_CHORD_DURATION: MusicalTime = MusicalTime::Note { division: 4, dotted: false };

/// Default spacing between arpeggio notes.
pub const DEFAULT_ARPEGGIO_INTERVAL: MusicalTime = MusicalTime::Note { division: 16, dotted: false };

/// Default trigger velocity.
pub const DEFAULT_VELOCITY: f32 = 0.7;

/// Fixed-point beat representation with 16 fractional bits.
///
/// Transport callbacks are keyed by `BeatTime`, so two events written at
/// the same musical position always compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatTime {
    beats: i64,
}

impl BeatTime {
    const SCALE: i64 = 65_536;

    /// Zero beat time constant.
    pub const ZERO: BeatTime = BeatTime { beats: 0 };

    /// Smallest representable step.
    pub const EPSILON: BeatTime = BeatTime { beats: 1 };

    /// Create a BeatTime from a floating-point beat value.
    #[inline]
    pub fn from_float(value: f64) -> Self {
        Self {
            beats: (value * Self::SCALE as f64).round() as i64,
        }
    }

    /// Convert to a floating-point beat value.
    #[inline]
    pub fn to_float(self) -> f64 {
        self.beats as f64 / Self::SCALE as f64
    }
}

impl std::ops::Add for BeatTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_add(rhs.beats),
        }
    }
}

impl std::ops::Sub for BeatTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_sub(rhs.beats),
        }
    }
}

/// Musical time signature (numerator/denominator).
///
/// The numerator indicates beats per bar, and the denominator indicates
/// the note value that gets one beat (4 = quarter note, 8 = eighth note).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Number of quarter-note beats per bar.
    ///
    /// For 4/4: 4 beats per bar
    /// For 6/8: 3 beats per bar (6 eighth notes = 3 quarter notes)
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Tempo and signature needed to resolve a [`MusicalTime`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeContext {
    pub bpm: f64,
    pub signature: TimeSignature,
}

impl TimeContext {
    /// Create a context in 4/4 at the given tempo.
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            signature: TimeSignature::default(),
        }
    }

    /// Seconds occupied by a number of quarter-note beats.
    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * 60.0 / self.bpm
    }

    /// Quarter-note beats covered by a number of seconds.
    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * self.bpm / 60.0
    }

    /// Resolve a musical time to quarter-note beats.
    pub fn to_beats(&self, time: &MusicalTime) -> f64 {
        time.to_beats(self)
    }

    /// Resolve a musical time to seconds.
    pub fn to_seconds(&self, time: &MusicalTime) -> f64 {
        time.to_seconds(self)
    }

    /// Resolve a musical time to milliseconds.
    pub fn to_milliseconds(&self, time: &MusicalTime) -> f64 {
        time.to_milliseconds(self)
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::new(120.0)
    }
}

/// A musical-time expression.
///
/// Parsed from the usual notation strings:
///
/// ```
/// use pianola_core::{MusicalTime, TimeContext};
///
/// let ctx = TimeContext::new(120.0);
/// let quarter: MusicalTime = "4n".parse().unwrap();
/// assert_eq!(quarter.to_milliseconds(&ctx), 500.0);
///
/// let position: MusicalTime = "1:2:0".parse().unwrap();
/// assert_eq!(position.to_beats(&ctx), 6.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MusicalTime {
    /// Note value, `4n` is a quarter note, `1n` a whole bar. Dotted adds half.
    Note { division: u32, dotted: bool },
    /// Triplet note value (`8t`).
    Triplet { division: u32 },
    /// Whole measures (`2m`).
    Measures(f64),
    /// Transport ticks at [`PPQ`] per quarter note (`192i`).
    Ticks(u64),
    /// Bars:beats:sixteenths position (`1:2:3`).
    Position { bars: f64, beats: f64, sixteenths: f64 },
    /// Literal seconds (`0.5`, `0.5s`).
    Seconds(f64),
    /// Literal milliseconds (`250ms`).
    Milliseconds(f64),
}

impl MusicalTime {
    /// Quarter-note beats represented by this expression.
    pub fn to_beats(&self, ctx: &TimeContext) -> f64 {
        let bar = ctx.signature.beats_per_bar();
        match *self {
            MusicalTime::Note { division, dotted } => {
                let base = if division == 1 { bar } else { 4.0 / division as f64 };
                if dotted {
                    base * 1.5
                } else {
                    base
                }
            }
            MusicalTime::Triplet { division } => 8.0 / (division as f64 * 3.0),
            MusicalTime::Measures(m) => m * bar,
            MusicalTime::Ticks(t) => t as f64 / PPQ as f64,
            MusicalTime::Position { bars, beats, sixteenths } => {
                bars * bar + beats + sixteenths / 4.0
            }
            MusicalTime::Seconds(s) => ctx.seconds_to_beats(s),
            MusicalTime::Milliseconds(ms) => ctx.seconds_to_beats(ms / 1000.0),
        }
    }

    /// Seconds represented by this expression at the context's tempo.
    pub fn to_seconds(&self, ctx: &TimeContext) -> f64 {
        match *self {
            MusicalTime::Seconds(s) => s,
            MusicalTime::Milliseconds(ms) => ms / 1000.0,
            _ => ctx.beats_to_seconds(self.to_beats(ctx)),
        }
    }

    /// Milliseconds represented by this expression at the context's tempo.
    pub fn to_milliseconds(&self, ctx: &TimeContext) -> f64 {
        self.to_seconds(ctx) * 1000.0
    }
}

fn parse_number(text: &str, input: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTime(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidTime(input.to_string()));
    }
    Ok(value)
}

fn parse_division(text: &str, input: &str) -> Result<u32> {
    match text.trim().parse::<u32>() {
        Ok(division) if division > 0 => Ok(division),
        _ => Err(Error::InvalidTime(input.to_string())),
    }
}

impl FromStr for MusicalTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim().to_lowercase();
        if text.is_empty() {
            return Err(Error::InvalidTime(s.to_string()));
        }

        if let Some(ms) = text.strip_suffix("ms") {
            return Ok(MusicalTime::Milliseconds(parse_number(ms, s)?));
        }

        if text.contains(':') {
            let parts: Vec<&str> = text.split(':').collect();
            if parts.len() > 3 {
                return Err(Error::InvalidTime(s.to_string()));
            }
            let mut values = [0.0; 3];
            for (slot, part) in values.iter_mut().zip(parts.iter()) {
                *slot = if part.trim().is_empty() { 0.0 } else { parse_number(part, s)? };
            }
            return Ok(MusicalTime::Position {
                bars: values[0],
                beats: values[1],
                sixteenths: values[2],
            });
        }

        if let Some(n) = text.strip_suffix("n.") {
            return Ok(MusicalTime::Note { division: parse_division(n, s)?, dotted: true });
        }
        if let Some(n) = text.strip_suffix('n') {
            return Ok(MusicalTime::Note { division: parse_division(n, s)?, dotted: false });
        }
        if let Some(t) = text.strip_suffix('t') {
            return Ok(MusicalTime::Triplet { division: parse_division(t, s)? });
        }
        if let Some(m) = text.strip_suffix('m') {
            return Ok(MusicalTime::Measures(parse_number(m, s)?));
        }
        if let Some(i) = text.strip_suffix('i') {
            return i
                .trim()
                .parse::<u64>()
                .map(MusicalTime::Ticks)
                .map_err(|_| Error::InvalidTime(s.to_string()));
        }
        if let Some(secs) = text.strip_suffix('s') {
            return Ok(MusicalTime::Seconds(parse_number(secs, s)?));
        }

        Ok(MusicalTime::Seconds(parse_number(&text, s)?))
    }
}

impl fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MusicalTime::Note { division, dotted: false } => write!(f, "{}n", division),
            MusicalTime::Note { division, dotted: true } => write!(f, "{}n.", division),
            MusicalTime::Triplet { division } => write!(f, "{}t", division),
            MusicalTime::Measures(m) => write!(f, "{}m", m),
            MusicalTime::Ticks(t) => write!(f, "{}i", t),
            MusicalTime::Position { bars, beats, sixteenths } => {
                write!(f, "{}:{}:{}", bars, beats, sixteenths)
            }
            MusicalTime::Seconds(s) => write!(f, "{}s", s),
            MusicalTime::Milliseconds(ms) => write!(f, "{}ms", ms),
        }
    }
}

impl From<f64> for MusicalTime {
    fn from(seconds: f64) -> Self {
        MusicalTime::Seconds(seconds)
    }
}

impl Serialize for MusicalTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MusicalTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(f64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Number(seconds) => Ok(MusicalTime::Seconds(seconds)),
        }
    }
}
