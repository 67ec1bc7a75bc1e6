//! Voice chain: the sound-producing end of the engine.
//!
//! The engine only ever talks to a [`VoiceChain`]. A caller can plug in
//! its own chain through a [`SynthFactory`]; otherwise [`PolySynth`] is
//! built from [`SynthSettings`].

use crate::pitch::{db_to_gain, Pitch};
use crate::timing::MusicalTime;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One `trigger_attack_release` request.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceTrigger {
    /// Pitches to sound together.
    pub pitches: Vec<Pitch>,
    /// Duration as requested by the caller.
    pub duration: MusicalTime,
    /// `duration` resolved at the tempo in effect when triggered.
    pub duration_secs: f64,
    /// Transport-relative start time in seconds, `None` for "now".
    pub time: Option<f64>,
    /// Velocity in `[0, 1]`.
    pub velocity: f32,
    /// When the engine issued the trigger.
    pub issued_at: Instant,
}

/// A replaceable audio-producing unit.
pub trait VoiceChain: Send {
    /// Sound the trigger's pitches for its duration.
    fn trigger_attack_release(&mut self, trigger: &VoiceTrigger);

    /// Set the master output level in decibels (0 dB is unity).
    fn set_output_level(&mut self, _level_db: f32) {}

    /// Release every resource held by the chain. Safe to call twice.
    fn dispose(&mut self);
}

/// Builds the engine's voice chain, called once at construction.
pub type SynthFactory = Box<dyn FnOnce() -> Box<dyn VoiceChain> + Send>;

/// Oscillator waveform of the default synth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Oscillator {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

/// ADSR envelope (seconds, sustain as level).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSettings {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            attack: 0.002,
            decay: 0.5,
            sustain: 0.15,
            release: 1.5,
        }
    }
}

/// Lowpass filter after the voices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub frequency: f64,
    pub q: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            frequency: 5000.0,
            q: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack: f64,
    pub release: f64,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 3.0,
            attack: 0.003,
            release: 0.25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub decay: f64,
    pub wet: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            decay: 1.5,
            wet: 0.2,
        }
    }
}

/// Settings for the default [`PolySynth`] chain.
///
/// `PolySynth` reads the volume, oscillator, envelope release and polyphony.
/// The rest of the envelope, the filter, compressor and reverb pass through
/// for host chains that render audio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    /// Synth volume in dB.
    pub volume_db: f32,
    pub oscillator: Oscillator,
    pub envelope: EnvelopeSettings,
    pub filter: FilterSettings,
    pub compressor: CompressorSettings,
    pub reverb: ReverbSettings,
    /// Voices sounding at once before the oldest is stolen.
    pub max_polyphony: usize,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            volume_db: -8.0,
            oscillator: Oscillator::Sine,
            envelope: EnvelopeSettings::default(),
            filter: FilterSettings::default(),
            compressor: CompressorSettings::default(),
            reverb: ReverbSettings::default(),
            max_polyphony: 32,
        }
    }
}

impl SynthSettings {
    /// Factory building a [`PolySynth`] with these settings.
    pub fn factory(self) -> SynthFactory {
        Box::new(move || Box::new(PolySynth::new(self)) as Box<dyn VoiceChain>)
    }
}

#[derive(Clone, Debug)]
struct Voice {
    pitch: Pitch,
    started: Instant,
    /// `None` when the hold is too long to represent; freed only by stealing.
    free_at: Option<Instant>,
}

impl Voice {
    fn sounding_at(&self, now: Instant) -> bool {
        self.free_at.map_or(true, |at| at > now)
    }
}

/// Default polyphonic voice chain.
///
/// Keeps voice bookkeeping only: one voice per pitch, held for the note's
/// duration plus the envelope release, oldest stolen first.
#[derive(Debug)]
pub struct PolySynth {
    settings: SynthSettings,
    output_db: f32,
    voices: Vec<Voice>,
    disposed: bool,
}

impl PolySynth {
    pub fn new(settings: SynthSettings) -> Self {
        log::debug!(
            "[SYNTH] {:?} poly synth, {} voices, {} dB",
            settings.oscillator,
            settings.max_polyphony,
            settings.volume_db
        );
        Self {
            settings,
            output_db: 0.0,
            voices: Vec::new(),
            disposed: false,
        }
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    /// Overall gain in dB: synth volume plus master output level.
    pub fn gain_db(&self) -> f32 {
        self.settings.volume_db + self.output_db
    }

    /// Linear amplitude a note of `velocity` sounds at.
    pub fn amplitude(&self, velocity: f32) -> f64 {
        db_to_gain(self.gain_db() as f64) * velocity.clamp(0.0, 1.0) as f64
    }

    /// Number of voices still sounding at `now`.
    pub fn active_voices(&self, now: Instant) -> usize {
        self.voices.iter().filter(|v| v.sounding_at(now)).count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn allocate(&mut self, pitch: &Pitch, started: Instant, free_at: Option<Instant>) {
        if let Some(voice) = self.voices.iter_mut().find(|v| &v.pitch == pitch) {
            voice.started = started;
            voice.free_at = free_at;
            return;
        }

        if self.voices.len() >= self.settings.max_polyphony.max(1) {
            if let Some(oldest) = self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.started)
                .map(|(i, _)| i)
            {
                let stolen = self.voices.remove(oldest);
                log::warn!("[SYNTH] Polyphony exhausted, stealing voice {}", stolen.pitch);
            }
        }

        self.voices.push(Voice {
            pitch: pitch.clone(),
            started,
            free_at,
        });
    }
}

impl VoiceChain for PolySynth {
    fn trigger_attack_release(&mut self, trigger: &VoiceTrigger) {
        if self.disposed {
            return;
        }

        let started = trigger.issued_at;
        self.voices.retain(|v| v.sounding_at(started));

        let held = Duration::try_from_secs_f64(
            (trigger.duration_secs + self.settings.envelope.release).max(0.0),
        )
        .unwrap_or(Duration::MAX);
        let free_at = started.checked_add(held);

        let amplitude = self.amplitude(trigger.velocity);
        for pitch in &trigger.pitches {
            log::trace!(
                "[SYNTH] {} ({:.1} Hz) for {} at amplitude {:.3}",
                pitch,
                pitch.frequency().unwrap_or_default(),
                trigger.duration,
                amplitude
            );
            self.allocate(pitch, started, free_at);
        }
    }

    fn set_output_level(&mut self, level_db: f32) {
        self.output_db = level_db;
        log::debug!("[SYNTH] Output level {} dB", level_db);
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.voices.clear();
        log::debug!("[SYNTH] Disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::pitches;

    fn trigger(names: &[&str], secs: f64, at: Instant) -> VoiceTrigger {
        VoiceTrigger {
            pitches: pitches(names.iter().copied()),
            duration: MusicalTime::Seconds(secs),
            duration_secs: secs,
            time: None,
            velocity: 0.7,
            issued_at: at,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = SynthSettings::default();
        assert_eq!(settings.volume_db, -8.0);
        assert_eq!(settings.oscillator, Oscillator::Sine);
        assert_eq!(settings.envelope.release, 1.5);
        assert_eq!(settings.filter.frequency, 5000.0);
        assert_eq!(settings.compressor.ratio, 3.0);
        assert_eq!(settings.reverb.wet, 0.2);
        assert_eq!(settings.max_polyphony, 32);
    }

    #[test]
    fn test_voices_free_after_release() {
        let t0 = Instant::now();
        let mut synth = PolySynth::new(SynthSettings::default());
        synth.trigger_attack_release(&trigger(&["C4", "E4", "G4"], 0.5, t0));
        assert_eq!(synth.active_voices(t0), 3);
        // 0.5s note + 1.5s release
        assert_eq!(synth.active_voices(t0 + Duration::from_millis(1900)), 3);
        assert_eq!(synth.active_voices(t0 + Duration::from_millis(2100)), 0);
    }

    #[test]
    fn test_retrigger_reuses_voice() {
        let t0 = Instant::now();
        let mut synth = PolySynth::new(SynthSettings::default());
        synth.trigger_attack_release(&trigger(&["C4"], 0.25, t0));
        synth.trigger_attack_release(&trigger(&["C4"], 0.25, t0 + Duration::from_millis(10)));
        assert_eq!(synth.active_voices(t0 + Duration::from_millis(10)), 1);
    }

    #[test]
    fn test_steals_oldest_voice() {
        let t0 = Instant::now();
        let mut synth = PolySynth::new(SynthSettings {
            max_polyphony: 2,
            ..Default::default()
        });
        synth.trigger_attack_release(&trigger(&["C4"], 1.0, t0));
        synth.trigger_attack_release(&trigger(&["E4"], 1.0, t0 + Duration::from_millis(1)));
        synth.trigger_attack_release(&trigger(&["G4"], 1.0, t0 + Duration::from_millis(2)));

        let sounding: Vec<_> = synth.voices.iter().map(|v| v.pitch.to_string()).collect();
        assert_eq!(sounding, vec!["E4", "G4"]);
    }

    #[test]
    fn test_dispose_is_idempotent_and_silences() {
        let t0 = Instant::now();
        let mut synth = PolySynth::new(SynthSettings::default());
        synth.trigger_attack_release(&trigger(&["C4"], 1.0, t0));
        synth.dispose();
        synth.dispose();
        assert!(synth.is_disposed());
        synth.trigger_attack_release(&trigger(&["D4"], 1.0, t0));
        assert_eq!(synth.active_voices(t0), 0);
    }

    #[test]
    fn test_unbounded_hold_keeps_voice() {
        let t0 = Instant::now();
        let mut synth = PolySynth::new(SynthSettings::default());
        synth.trigger_attack_release(&trigger(&["C4"], 1e20, t0));
        synth.trigger_attack_release(&trigger(&["E4"], f64::MAX, t0));
        assert_eq!(synth.active_voices(t0 + Duration::from_secs(86_400)), 2);

        // Still reusable afterwards
        synth.trigger_attack_release(&trigger(&["C4"], 0.25, t0 + Duration::from_millis(5)));
        assert_eq!(synth.active_voices(t0 + Duration::from_secs(86_400)), 1);
    }

    #[test]
    fn test_output_level_adds_to_synth_volume() {
        let mut synth = PolySynth::new(SynthSettings::default());
        assert_eq!(synth.gain_db(), -8.0);
        synth.set_output_level(-4.0);
        assert_eq!(synth.gain_db(), -12.0);
        assert_eq!(synth.settings().volume_db, -8.0);

        synth.set_output_level(8.0);
        assert!((synth.amplitude(1.0) - 1.0).abs() < 1e-9);
        assert!((synth.amplitude(0.5) - 0.5).abs() < 1e-9);
        synth.set_output_level(-12.0);
        assert!((synth.amplitude(1.0) - 0.1).abs() < 1e-9);
        assert_eq!(synth.amplitude(-1.0), 0.0);
    }
}
