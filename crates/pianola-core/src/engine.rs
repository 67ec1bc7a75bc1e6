//! The piano engine.
//!
//! [`PianoEngine`] ties the transport, the melody player, the highlight
//! tracker, the voice chain and the observer together behind one cloneable
//! handle. All state lives in a single core behind a mutex, and a
//! driver task sleeps until the next transport callback or highlight expiry.
//!
//! Caller-supplied callbacks (`on_event`, `on_complete`, observer
//! listeners, `on_ready`) always run with the engine unlocked, so they are
//! free to call back into the engine.
//!
//! The engine must be created from within a Tokio runtime.

use crate::context::{AudioContext, ImmediateAudioContext};
use crate::error::{Error, Result};
use crate::highlight::{
    HighlightDuration, HighlightTracker, DEFAULT_CLICK_HIGHLIGHT_MS, DEFAULT_GROUP_COUNT,
    DEFAULT_MELODY_GRACE_MS,
};
use crate::melody::{
    ChordEvent, CompletionCallback, EventCallback, Fired, MelodyJob, MelodyPlayer, MelodySequence,
    ScheduleId, EVENT_DEFAULT_VELOCITY,
};
use crate::observer::{PianoEvent, PianoObserver, Subscription};
use crate::pitch::Pitch;
use crate::timing::{
    BeatTime, MusicalTime, DEFAULT_ARPEGGIO_INTERVAL, DEFAULT_CHORD_DURATION,
    DEFAULT_NOTE_DURATION, DEFAULT_VELOCITY,
};
use crate::transport::{Transport, TransportState};
use crate::voice::{PolySynth, SynthFactory, SynthSettings, VoiceChain, VoiceTrigger};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Fired the first time the audio handshake succeeds.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Construction options for [`PianoEngine`].
pub struct EngineOptions {
    /// Initial tempo.
    pub bpm: f64,
    /// Replaces the default [`PolySynth`].
    pub create_synth: Option<SynthFactory>,
    pub on_ready: Option<ReadyCallback>,
    /// Number of highlight groups.
    pub group_count: usize,
    /// How long [`PianoEngine::press_key`] lights a key.
    pub click_highlight_ms: u64,
    /// Added to a melody event's duration when lighting its keys.
    pub melody_highlight_grace_ms: u64,
    pub audio: Arc<dyn AudioContext>,
    /// Share an existing observer instead of creating one.
    pub observer: Option<PianoObserver>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            create_synth: None,
            on_ready: None,
            group_count: DEFAULT_GROUP_COUNT,
            click_highlight_ms: DEFAULT_CLICK_HIGHLIGHT_MS,
            melody_highlight_grace_ms: DEFAULT_MELODY_GRACE_MS,
            audio: Arc::new(ImmediateAudioContext),
            observer: None,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_synth<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Box<dyn VoiceChain> + Send + 'static,
    {
        self.create_synth = Some(Box::new(factory));
        self
    }

    pub fn with_on_ready<F>(mut self, on_ready: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_ready = Some(Box::new(on_ready));
        self
    }

    pub fn with_audio_context(mut self, audio: Arc<dyn AudioContext>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_observer(mut self, observer: PianoObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

fn run_isolated(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::warn!("[ENGINE] {} callback panicked", what);
    }
}

/// Mutable engine state. Only ever touched with the core lock held.
struct EngineCore {
    transport: Transport<MelodyJob>,
    player: MelodyPlayer,
    highlights: HighlightTracker,
    voice: Option<Box<dyn VoiceChain>>,
    master_volume_db: f32,
    disposed: bool,
}

impl EngineCore {
    /// Trigger the voice chain. Returns the resolved duration in seconds,
    /// or `None` when there is no voice to play.
    fn trigger(
        &mut self,
        pitches: Vec<Pitch>,
        duration: MusicalTime,
        time: Option<f64>,
        velocity: f32,
        now: Instant,
    ) -> Option<f64> {
        let voice = self.voice.as_mut()?;
        let duration_secs = duration.to_seconds(&self.transport.time_context());
        voice.trigger_attack_release(&VoiceTrigger {
            pitches,
            duration,
            duration_secs,
            time,
            velocity,
            issued_at: now,
        });
        Some(duration_secs)
    }

    /// Resolve one due melody job, triggering the voice for events.
    fn fire(&mut self, beat: BeatTime, job: MelodyJob, now: Instant) -> Option<Fired> {
        let seconds = self
            .transport
            .time_context()
            .beats_to_seconds(beat.to_float());
        let fired = self.player.fire(job, seconds)?;
        if let Fired::Event { event, .. } = &fired {
            let velocity = event.velocity.unwrap_or(EVENT_DEFAULT_VELOCITY);
            self.trigger(
                event.pitches.clone(),
                event.duration,
                Some(seconds),
                velocity,
                now,
            );
        }
        Some(fired)
    }

    fn next_deadline(&self, now: Instant) -> Option<Instant> {
        match (self.transport.next_deadline(now), self.highlights.next_expiry()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn teardown(&mut self, now: Instant) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.player.clear();
        self.transport.stop(now);
        self.highlights.clear_all();
        if let Some(mut voice) = self.voice.take() {
            voice.dispose();
        }
        log::debug!("[ENGINE] Disposed");
    }
}

struct Inner {
    core: Mutex<EngineCore>,
    wake: Arc<Notify>,
    observer: PianoObserver,
    audio: Arc<dyn AudioContext>,
    on_ready: Mutex<Option<ReadyCallback>>,
    ready: AtomicBool,
    click_highlight: Duration,
    melody_grace_ms: f64,
}

impl Inner {
    /// Run everything that is due at `now`.
    fn pump(&self, now: Instant) {
        let due = {
            let mut core = self.core.lock();
            core.highlights.expire(now);
            core.transport.take_due(now)
        };

        for (beat, job) in due {
            let fired = self.core.lock().fire(beat, job, now);
            match fired {
                Some(Fired::Event { event, on_event, .. }) => {
                    run_isolated("on_event", || on_event(event));
                }
                Some(Fired::Complete { on_complete, .. }) => {
                    if let Some(on_complete) = on_complete {
                        run_isolated("on_complete", on_complete);
                    }
                    {
                        let mut core = self.core.lock();
                        // on_complete may already have installed the next melody
                        if !core.player.is_active() {
                            core.transport.stop(now);
                            core.player.clear();
                        }
                    }
                    self.observer.notify(&PianoEvent::SequenceEnded);
                }
                None => {}
            }
        }
    }

    fn next_deadline(&self, now: Instant) -> Option<Instant> {
        self.core.lock().next_deadline(now)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.core.get_mut().teardown(now());
        self.wake.notify_one();
    }
}

async fn drive(inner: Weak<Inner>, wake: Arc<Notify>) {
    loop {
        let deadline = {
            let Some(inner) = inner.upgrade() else { break };
            if inner.core.lock().disposed {
                break;
            }
            let now = now();
            inner.pump(now);
            inner.next_deadline(now)
        };

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
    log::trace!("[ENGINE] Driver stopped");
}

/// Handle to a running piano engine. Clones share the same engine.
#[derive(Clone)]
pub struct PianoEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PianoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PianoEngine")
            .field("ready", &self.is_ready())
            .field("bpm", &self.bpm())
            .field("state", &self.transport_state())
            .finish()
    }
}

impl PianoEngine {
    /// Build the engine, its voice chain, and the driver task.
    pub fn new(options: EngineOptions) -> Self {
        let now = now();
        let voice = match options.create_synth {
            Some(factory) => factory(),
            None => Box::new(PolySynth::new(SynthSettings::default())),
        };

        let core = EngineCore {
            transport: Transport::new(options.bpm, now),
            player: MelodyPlayer::new(),
            highlights: HighlightTracker::new(options.group_count),
            voice: Some(voice),
            master_volume_db: 0.0,
            disposed: false,
        };

        let inner = Arc::new(Inner {
            core: Mutex::new(core),
            wake: Arc::new(Notify::new()),
            observer: options.observer.unwrap_or_default(),
            audio: options.audio,
            on_ready: Mutex::new(options.on_ready),
            ready: AtomicBool::new(false),
            click_highlight: Duration::from_millis(options.click_highlight_ms),
            melody_grace_ms: options.melody_highlight_grace_ms as f64,
        });

        tokio::spawn(drive(Arc::downgrade(&inner), Arc::clone(&inner.wake)));
        log::debug!("[ENGINE] Created at {} bpm", options.bpm);

        Self { inner }
    }

    fn wake(&self) {
        self.inner.wake.notify_one();
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut EngineCore, Instant) -> R) -> R {
        let now = now();
        let mut core = self.inner.core.lock();
        core.highlights.expire(now);
        f(&mut core, now)
    }

    // ========================================================================
    // Readiness and transport
    // ========================================================================

    /// Perform the audio handshake and start the transport.
    ///
    /// `on_ready` fires after the first success only. On failure the engine
    /// stays not-ready and `start` may be called again.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.inner.audio.resume().await {
            log::error!("[ENGINE] Audio handshake failed: {}", e);
            return Err(match e {
                Error::Handshake(msg) => Error::Handshake(msg),
                other => Error::Handshake(other.to_string()),
            });
        }

        self.with_core(|core, now| core.transport.start(now));
        self.wake();
        self.inner.ready.store(true, Ordering::SeqCst);

        let on_ready = self.inner.on_ready.lock().take();
        if let Some(on_ready) = on_ready {
            run_isolated("on_ready", on_ready);
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Start or resume the transport.
    pub fn play(&self) {
        self.with_core(|core, now| core.transport.start(now));
        self.wake();
    }

    /// Pause the transport, keeping the position and pending callbacks.
    pub fn pause(&self) {
        self.with_core(|core, now| core.transport.pause(now));
        self.wake();
    }

    /// Stop the transport, drop the current melody, rewind to zero.
    pub fn stop(&self) {
        self.with_core(|core, now| {
            core.transport.stop(now);
            core.player.clear();
        });
        self.wake();
    }

    /// Drop every pending transport callback without moving the position.
    ///
    /// The current melody can no longer fire, so it is dropped as well.
    pub fn cancel_scheduled_events(&self) {
        self.with_core(|core, _| {
            let cancelled = core.transport.cancel();
            core.player.clear();
            log::debug!("[ENGINE] Cancelled {} scheduled callbacks", cancelled);
        });
        self.wake();
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.with_core(|core, now| core.transport.set_bpm(bpm, now));
        self.wake();
    }

    pub fn bpm(&self) -> f64 {
        self.inner.core.lock().transport.bpm()
    }

    pub fn transport_state(&self) -> TransportState {
        self.inner.core.lock().transport.state()
    }

    /// Transport position in seconds.
    pub fn transport_seconds(&self) -> f64 {
        self.with_core(|core, now| core.transport.seconds(now))
    }

    pub fn set_master_volume(&self, volume_db: f32) {
        self.with_core(|core, _| {
            core.master_volume_db = volume_db;
            if let Some(voice) = core.voice.as_mut() {
                voice.set_output_level(volume_db);
            }
        });
    }

    pub fn master_volume(&self) -> f32 {
        self.inner.core.lock().master_volume_db
    }

    /// Milliseconds covered by `duration` at the current tempo.
    pub fn duration_to_ms(&self, duration: &MusicalTime) -> f64 {
        self.inner
            .core
            .lock()
            .transport
            .time_context()
            .to_milliseconds(duration)
    }

    pub fn duration_to_seconds(&self, duration: &MusicalTime) -> f64 {
        self.inner
            .core
            .lock()
            .transport
            .time_context()
            .to_seconds(duration)
    }

    // ========================================================================
    // Direct playback
    // ========================================================================

    fn trigger(
        &self,
        pitches: Vec<Pitch>,
        duration: MusicalTime,
        time: Option<f64>,
        velocity: f32,
    ) -> Option<f64> {
        self.with_core(|core, now| core.trigger(pitches, duration, time, velocity, now))
    }

    /// Play one pitch.
    ///
    /// Without `time`, resolves once the note's duration has elapsed. With a
    /// transport `time` (seconds), resolves immediately.
    pub async fn play_note(
        &self,
        pitch: impl Into<Pitch>,
        duration: Option<MusicalTime>,
        time: Option<f64>,
        velocity: Option<f32>,
    ) {
        let duration = duration.unwrap_or(DEFAULT_NOTE_DURATION);
        let velocity = velocity.unwrap_or(DEFAULT_VELOCITY);
        let Some(secs) = self.trigger(vec![pitch.into()], duration, time, velocity) else {
            return;
        };
        if time.is_none() {
            tokio::time::sleep(secs_to_duration(secs)).await;
        }
    }

    /// Play pitches together. An empty chord resolves immediately.
    pub async fn play_chord(
        &self,
        pitches: Vec<Pitch>,
        duration: Option<MusicalTime>,
        time: Option<f64>,
        velocity: Option<f32>,
    ) {
        if pitches.is_empty() {
            return;
        }
        let duration = duration.unwrap_or(DEFAULT_CHORD_DURATION);
        let velocity = velocity.unwrap_or(DEFAULT_VELOCITY);
        let Some(secs) = self.trigger(pitches, duration, time, velocity) else {
            return;
        };
        if time.is_none() {
            tokio::time::sleep(secs_to_duration(secs)).await;
        }
    }

    /// Play pitches one after another, `interval` apart, then wait out the
    /// last note's `duration`.
    pub async fn play_arpeggio(
        &self,
        pitches: Vec<Pitch>,
        duration: Option<MusicalTime>,
        interval: Option<MusicalTime>,
        velocity: Option<f32>,
    ) {
        let duration = duration.unwrap_or(DEFAULT_NOTE_DURATION);
        let interval = interval.unwrap_or(DEFAULT_ARPEGGIO_INTERVAL);
        let velocity = velocity.unwrap_or(DEFAULT_VELOCITY);

        let count = pitches.len();
        for (i, pitch) in pitches.into_iter().enumerate() {
            if self.trigger(vec![pitch], duration, None, velocity).is_none() {
                return;
            }
            if i + 1 < count {
                let gap = self.duration_to_seconds(&interval);
                tokio::time::sleep(secs_to_duration(gap)).await;
            }
        }

        if count > 0 {
            let tail = self.duration_to_seconds(&duration);
            tokio::time::sleep(secs_to_duration(tail)).await;
        }
    }

    /// A key click: light the key briefly, sound it, and notify observers.
    pub fn press_key(&self, pitch: impl Into<Pitch>) {
        let pitch = pitch.into();
        let click = self.inner.click_highlight;
        self.with_core(|core, now| {
            core.highlights.highlight_clicked_note(pitch.clone(), click, now);
            core.trigger(
                vec![pitch.clone()],
                DEFAULT_NOTE_DURATION,
                None,
                DEFAULT_VELOCITY,
                now,
            );
        });
        self.wake();
        self.inner
            .observer
            .notify(&PianoEvent::NotePlayed { note: pitch });
    }

    /// Show a static chord: replace group 0 with `pitches`, lit until
    /// cleared, and sound each one.
    pub fn show_chord(&self, pitches: &[Pitch]) {
        self.with_core(|core, now| {
            core.highlights.clear_group(0);
            for pitch in pitches {
                core.trigger(
                    vec![pitch.clone()],
                    DEFAULT_CHORD_DURATION,
                    None,
                    DEFAULT_VELOCITY,
                    now,
                );
                core.highlights
                    .highlight_note_in_group(pitch.clone(), HighlightDuration::Forever, 0, now);
            }
        });
        self.wake();
    }

    // ========================================================================
    // Melodies
    // ========================================================================

    /// Replace the current melody with `sequence`.
    ///
    /// The previous melody is stopped first and will neither fire further
    /// events nor complete. The transport is left stopped at zero; call
    /// [`PianoEngine::play`] to hear the new melody. Returns `None` when
    /// nothing was scheduled (empty sequence or disposed engine).
    pub fn schedule_melody<F>(
        &self,
        sequence: MelodySequence,
        on_event: F,
        on_complete: Option<CompletionCallback>,
    ) -> Option<ScheduleId>
    where
        F: Fn(ChordEvent) + Send + Sync + 'static,
    {
        let on_event: EventCallback = Arc::new(on_event);
        let id = self.with_core(|core, now| {
            let can_play = core.voice.is_some();
            core.player.schedule(
                &mut core.transport,
                sequence,
                on_event,
                on_complete,
                can_play,
                now,
            )
        });
        self.wake();
        id
    }

    pub fn is_melody_active(&self) -> bool {
        self.inner.core.lock().player.is_active()
    }

    /// Reflect a fired melody event: notify `ChordPlayed` and, when the
    /// event names a 1-based highlight group, light its pitches for the
    /// event's duration plus the grace margin.
    pub fn handle_melody_event(&self, event: &ChordEvent) {
        if event.pitches.is_empty() {
            return;
        }

        self.inner.observer.notify(&PianoEvent::ChordPlayed {
            chord: event.pitches.clone(),
        });

        let Some(group) = event.highlight_group else {
            return;
        };
        let Some(index) = (group as usize).checked_sub(1) else {
            return;
        };

        let visual_ms = self.duration_to_ms(&event.duration) + self.inner.melody_grace_ms;
        let lifetime = HighlightDuration::from_millis(visual_ms);
        self.with_core(|core, now| {
            for pitch in &event.pitches {
                core.highlights
                    .highlight_note_in_group(pitch.clone(), lifetime, index, now);
            }
        });
        self.wake();
    }

    // ========================================================================
    // Highlights
    // ========================================================================

    pub fn highlight_clicked_note(&self, note: impl Into<Pitch>, duration: impl Into<HighlightDuration>) {
        let (note, duration) = (note.into(), duration.into());
        self.with_core(|core, now| {
            core.highlights.highlight_clicked_note(note, duration, now);
        });
        self.wake();
    }

    /// Light a note in a 0-based group. Out-of-range groups are ignored.
    pub fn highlight_note_in_group(
        &self,
        note: impl Into<Pitch>,
        duration: impl Into<HighlightDuration>,
        group: usize,
    ) {
        let (note, duration) = (note.into(), duration.into());
        self.with_core(|core, now| {
            core.highlights
                .highlight_note_in_group(note, duration, group, now);
        });
        self.wake();
    }

    pub fn clear_group_highlights(&self, group: usize) {
        self.with_core(|core, _| core.highlights.clear_group(group));
    }

    pub fn clear_all_highlights(&self) {
        self.with_core(|core, _| core.highlights.clear_all());
    }

    pub fn is_note_clicked(&self, note: &str) -> bool {
        self.with_core(|core, _| core.highlights.is_note_clicked(note))
    }

    pub fn is_note_in_group(&self, note: &str, group: usize) -> bool {
        self.with_core(|core, _| core.highlights.is_note_in_group(note, group))
    }

    /// Notes currently lit by clicks, oldest first, repeats included.
    pub fn clicked_notes(&self) -> Vec<Pitch> {
        self.with_core(|core, _| {
            core.highlights
                .clicked()
                .iter()
                .map(|e| e.note.clone())
                .collect()
        })
    }

    /// Number of highlight groups, indexed from 0.
    pub fn group_count(&self) -> usize {
        self.inner.core.lock().highlights.group_count()
    }

    /// Notes currently lit in a group, oldest first, repeats included.
    pub fn group_notes(&self, group: usize) -> Vec<Pitch> {
        self.with_core(|core, _| {
            core.highlights
                .group(group)
                .iter()
                .map(|e| e.note.clone())
                .collect()
        })
    }

    // ========================================================================
    // Observers and teardown
    // ========================================================================

    pub fn observer(&self) -> &PianoObserver {
        &self.inner.observer
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PianoEvent) + Send + Sync + 'static,
    {
        self.inner.observer.subscribe(listener)
    }

    /// Stop everything and release the voice chain. Later playback calls
    /// are silent no-ops.
    pub fn dispose(&self) {
        self.with_core(|core, now| core.teardown(now));
        self.inner.ready.store(false, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.lock().disposed
    }
}
