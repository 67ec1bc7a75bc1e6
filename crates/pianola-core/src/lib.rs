//! Pianola Core - Melody scheduling and highlight synchronization for a virtual piano.
//!
//! This crate provides the building blocks of the piano engine:
//!
//! - **Timing** - Musical-time expressions, beat time, time signatures
//! - **Transport** - The shared musical clock and its callback queue
//! - **Voice** - The replaceable sound-producing chain and its default synth
//! - **Melody** - Chord events, melody files, and the single live schedule
//! - **Highlight** - Time-bounded key highlighting for clicks and groups
//! - **Observer** - Publish/subscribe fan-out of playback events
//! - **Engine** - The [`PianoEngine`] facade tying everything together
//! - **Config** - TOML configuration
//!
//! # Architecture
//!
//! The transport, melody player and highlight tracker are plain state
//! machines driven by explicit `Instant`s. [`PianoEngine`] owns one of each
//! behind a single lock and runs a Tokio driver task that wakes when the
//! next transport callback or highlight expiry is due. Starting a new
//! melody always invalidates the previous one before installing itself.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod melody;
pub mod observer;
pub mod pitch;
pub mod timing;
pub mod transport;
pub mod voice;

pub use config::{Config, EngineSettings};
pub use context::{AudioContext, ImmediateAudioContext};
pub use engine::{EngineOptions, PianoEngine, ReadyCallback};
pub use error::{Error, Result};
pub use highlight::{HighlightDuration, HighlightEntry, HighlightTracker};
pub use melody::{
    ChordEvent, CompletionCallback, EventCallback, MelodyFile, MelodyPlayer, MelodySequence,
    ScheduleId,
};
pub use observer::{PianoEvent, PianoObserver, Subscription};
pub use pitch::{pitches, Pitch};
pub use timing::{BeatTime, MusicalTime, TimeContext, TimeSignature};
pub use transport::{Transport, TransportState};
pub use voice::{PolySynth, SynthFactory, SynthSettings, VoiceChain, VoiceTrigger};
