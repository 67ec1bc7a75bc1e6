//! Melody scheduling.
//!
//! A melody is a list of [`ChordEvent`]s bound to the [`Transport`]. The
//! [`MelodyPlayer`] owns at most one live schedule; installing a new one
//! stops the transport and drops every pending callback of the old one
//! first, so a superseded melody can neither fire events nor complete.
//!
//! Queued callbacks carry a [`MelodyJob`] tagged with the schedule that
//! queued it. [`MelodyPlayer::fire`] turns a due job into a [`Fired`]
//! action, or nothing when the job belongs to a schedule that is gone.

use crate::error::Result;
use crate::pitch::Pitch;
use crate::timing::{BeatTime, MusicalTime};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Seconds added after the last event's sound before the melody completes.
pub const END_MARGIN_SECS: f64 = 0.05;

/// Velocity of melody events that do not set one.
pub const EVENT_DEFAULT_VELOCITY: f32 = 1.0;

/// One timed set of simultaneous pitches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    #[serde(default)]
    pub pitches: Vec<Pitch>,
    pub time: MusicalTime,
    pub duration: MusicalTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f32>,
    /// 1-based highlight group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_group: Option<u8>,
    /// Transport time in seconds, stamped when the event fires.
    #[serde(skip)]
    pub scheduled_play_time: Option<f64>,
}

impl ChordEvent {
    pub fn new(pitches: Vec<Pitch>, time: MusicalTime, duration: MusicalTime) -> Self {
        Self {
            pitches,
            time,
            duration,
            velocity: None,
            highlight_group: None,
            scheduled_play_time: None,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_highlight_group(mut self, group: u8) -> Self {
        self.highlight_group = Some(group);
        self
    }
}

pub type MelodySequence = Vec<ChordEvent>;

/// Called once per fired event, with `scheduled_play_time` set.
pub type EventCallback = Arc<dyn Fn(ChordEvent) + Send + Sync>;

/// Called once when a melody finishes on its own.
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Identity of one installed schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScheduleId(u64);

/// Transport payload for melody callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MelodyJob {
    Event { schedule: ScheduleId, index: usize },
    End { schedule: ScheduleId },
}

impl MelodyJob {
    pub fn schedule(&self) -> ScheduleId {
        match *self {
            MelodyJob::Event { schedule, .. } | MelodyJob::End { schedule } => schedule,
        }
    }
}

/// What the owner must do for a due job.
pub enum Fired {
    /// Trigger the voice for `event` and hand it to `on_event`.
    Event {
        schedule: ScheduleId,
        event: ChordEvent,
        on_event: EventCallback,
    },
    /// The melody is over; the schedule has already been retired.
    Complete {
        schedule: ScheduleId,
        on_complete: Option<CompletionCallback>,
    },
}

struct ActiveSchedule {
    id: ScheduleId,
    sequence: MelodySequence,
    on_event: EventCallback,
    on_complete: Option<CompletionCallback>,
    end: BeatTime,
}

enum ScheduleState {
    Idle,
    Active(ActiveSchedule),
}

/// Owner of the single live melody schedule.
pub struct MelodyPlayer {
    state: ScheduleState,
    next_id: u64,
}

impl Default for MelodyPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MelodyPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelodyPlayer")
            .field("current", &self.current())
            .finish()
    }
}

impl MelodyPlayer {
    pub fn new() -> Self {
        Self {
            state: ScheduleState::Idle,
            next_id: 0,
        }
    }

    /// Schedule currently installed, if any.
    pub fn current(&self) -> Option<ScheduleId> {
        match &self.state {
            ScheduleState::Active(active) => Some(active.id),
            ScheduleState::Idle => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    pub fn is_current(&self, id: ScheduleId) -> bool {
        self.current() == Some(id)
    }

    /// Beat at which the current melody completes.
    pub fn end_beat(&self) -> Option<BeatTime> {
        match &self.state {
            ScheduleState::Active(active) => Some(active.end),
            ScheduleState::Idle => None,
        }
    }

    /// Drop the current schedule and reset the transport.
    pub fn invalidate(&mut self, transport: &mut Transport<MelodyJob>, now: Instant) {
        if let ScheduleState::Active(active) = std::mem::replace(&mut self.state, ScheduleState::Idle) {
            log::debug!("[MELODY] Schedule {:?} superseded", active.id);
        }
        transport.stop(now);
    }

    /// Forget the current schedule without touching the transport.
    pub fn clear(&mut self) {
        self.state = ScheduleState::Idle;
    }

    /// Replace the current schedule with `sequence`.
    ///
    /// The previous schedule is always invalidated. An empty sequence, or
    /// `can_play == false` (no voice chain), leaves the player idle and the
    /// callbacks are dropped unused.
    pub fn schedule(
        &mut self,
        transport: &mut Transport<MelodyJob>,
        sequence: MelodySequence,
        on_event: EventCallback,
        on_complete: Option<CompletionCallback>,
        can_play: bool,
        now: Instant,
    ) -> Option<ScheduleId> {
        self.invalidate(transport, now);

        let last = sequence.last()?.clone();
        if !can_play {
            log::debug!("[MELODY] No voice chain, melody ignored");
            return None;
        }

        let id = ScheduleId(self.next_id);
        self.next_id += 1;

        let ctx = transport.time_context();
        for (index, event) in sequence.iter().enumerate() {
            let at = BeatTime::from_float(ctx.to_beats(&event.time));
            transport.schedule_once(at, MelodyJob::Event { schedule: id, index });
        }

        let end_secs = ctx.to_seconds(&last.time) + ctx.to_seconds(&last.duration) + END_MARGIN_SECS;
        let end = BeatTime::from_float(ctx.seconds_to_beats(end_secs));
        transport.schedule_once(end, MelodyJob::End { schedule: id });

        log::debug!(
            "[MELODY] Schedule {:?}: {} events, ends at {:.3}s",
            id,
            sequence.len(),
            end_secs
        );

        self.state = ScheduleState::Active(ActiveSchedule {
            id,
            sequence,
            on_event,
            on_complete,
            end,
        });
        Some(id)
    }

    /// Resolve a due job fired at transport time `seconds`.
    pub fn fire(&mut self, job: MelodyJob, seconds: f64) -> Option<Fired> {
        let active = match &mut self.state {
            ScheduleState::Active(active) if active.id == job.schedule() => active,
            _ => {
                log::trace!("[MELODY] Dropping stale job {:?}", job);
                return None;
            }
        };

        match job {
            MelodyJob::Event { schedule, index } => {
                let mut event = active.sequence.get(index)?.clone();
                event.scheduled_play_time = Some(seconds);
                log::trace!("[MELODY] Event {} at {:.3}s: {:?}", index, seconds, event.pitches);
                Some(Fired::Event {
                    schedule,
                    event,
                    on_event: Arc::clone(&active.on_event),
                })
            }
            MelodyJob::End { schedule } => {
                let on_complete = active.on_complete.take();
                self.state = ScheduleState::Idle;
                log::debug!("[MELODY] Schedule {:?} complete", schedule);
                Some(Fired::Complete { schedule, on_complete })
            }
        }
    }
}

/// A melody stored as TOML.
///
/// ```toml
/// bpm = 100
///
/// [[events]]
/// time = "0:0:0"
/// pitches = ["C4", "E4", "G4"]
/// duration = "4n"
/// highlight_group = 1
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MelodyFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub events: MelodySequence,
}

impl MelodyFile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
