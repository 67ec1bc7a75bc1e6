//! Pitch values ("C4", "F#5", "Bb3").
//!
//! A [`Pitch`] is an immutable note name plus octave. The engine never
//! validates pitches structurally; it passes them through to the voice
//! chain and uses [`Pitch::midi`] only for voice bookkeeping.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A note name with octave, e.g. `"C4"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pitch(String);

impl Pitch {
    /// Wrap a note name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The note name as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MIDI note number (C4 = 60), if the name parses.
    pub fn midi(&self) -> Option<u8> {
        parse_note_name(&self.0)
    }

    /// Equal-tempered frequency in Hz (A4 = 440), if the name parses.
    pub fn frequency(&self) -> Option<f64> {
        self.midi()
            .map(|note| 440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0))
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pitch {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Pitch {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl FromStr for Pitch {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl PartialEq<&str> for Pitch {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Build a pitch list from string literals.
pub fn pitches<I, S>(names: I) -> Vec<Pitch>
where
    I: IntoIterator<Item = S>,
    S: Into<Pitch>,
{
    names.into_iter().map(Into::into).collect()
}

/// Convert decibels to linear amplitude.
pub fn db_to_gain(decibels: f64) -> f64 {
    10.0_f64.powf(decibels / 20.0)
}

/// Parse a note name to MIDI note number.
pub fn parse_note_name(name: &str) -> Option<u8> {
    let name = name.trim();
    let mut chars = name.chars().peekable();

    let base = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut accidental = 0i16;
    while let Some(&c) = chars.peek() {
        match c {
            '#' | '♯' => {
                accidental = accidental.saturating_add(1);
                chars.next();
            }
            'b' | '♭' => {
                accidental = accidental.saturating_sub(1);
                chars.next();
            }
            _ => break,
        }
    }

    let octave: i8 = chars.collect::<String>().parse().ok()?;
    let midi = ((octave as i16 + 1) * 12 + base).saturating_add(accidental);

    if (0..=127).contains(&midi) {
        Some(midi as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_name() {
        assert_eq!(parse_note_name("C4"), Some(60));
        assert_eq!(parse_note_name("A4"), Some(69));
        assert_eq!(parse_note_name("C#4"), Some(61));
        assert_eq!(parse_note_name("Db4"), Some(61));
        assert_eq!(parse_note_name("B#3"), Some(60));
        assert_eq!(parse_note_name("C3"), Some(48));
        assert_eq!(parse_note_name("G9"), Some(127));
        assert_eq!(parse_note_name("C-1"), Some(0));
        assert_eq!(parse_note_name("C10"), None);
        assert_eq!(parse_note_name("C127"), None);
        assert_eq!(parse_note_name("C3000"), None);
        assert_eq!(parse_note_name("C-3000"), None);
        assert_eq!(parse_note_name(&format!("C{}4", "#".repeat(40_000))), None);
        assert_eq!(Pitch::from("C3000").frequency(), None);
        assert_eq!(parse_note_name("H4"), None);
        assert_eq!(parse_note_name("C"), None);
        assert_eq!(parse_note_name(""), None);
    }

    #[test]
    fn test_frequency() {
        let a4 = Pitch::from("A4");
        assert!((a4.frequency().unwrap() - 440.0).abs() < 1e-9);
        let a5 = Pitch::from("A5");
        assert!((a5.frequency().unwrap() - 880.0).abs() < 1e-9);
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 0.001);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 0.01);
        assert!((db_to_gain(-20.0) - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_pitches_helper() {
        let chord = pitches(["C4", "E4", "G4"]);
        assert_eq!(chord.len(), 3);
        assert_eq!(chord[1], "E4");
    }
}
