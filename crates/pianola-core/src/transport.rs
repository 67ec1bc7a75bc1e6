//! The shared musical clock.
//!
//! [`Transport`] holds tempo, run state and playback position, plus a
//! queue of one-shot callbacks keyed by beat position. It is a plain state
//! machine: every operation takes the current `Instant`, and the owner
//! collects due callbacks with [`Transport::take_due`]. The payload type
//! `J` is whatever the owner wants handed back when a callback fires.

use crate::timing::{BeatTime, TimeContext, TimeSignature};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Run state of the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Started,
    Paused,
    Stopped,
}

/// Handle to a scheduled one-shot callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// Musical clock with a queue of beat-positioned callbacks.
///
/// The clock keeps an anchor point (beat position at a specific instant)
/// and uses BPM to calculate the position at other instants.
#[derive(Debug)]
pub struct Transport<J> {
    bpm: f64,
    signature: TimeSignature,
    state: TransportState,
    anchor_instant: Instant,
    anchor_beat: BeatTime,
    queue: BTreeMap<(BeatTime, EventId), J>,
    next_id: u64,
}

impl<J> Transport<J> {
    /// Create a stopped transport at beat 0.
    pub fn new(bpm: f64, now: Instant) -> Self {
        Self {
            bpm: bpm.clamp(1.0, 999.0),
            signature: TimeSignature::default(),
            state: TransportState::Stopped,
            anchor_instant: now,
            anchor_beat: BeatTime::ZERO,
            queue: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Get the current BPM.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Set the BPM, preserving the current beat position.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) {
        self.anchor_beat = self.beat_at(now);
        self.anchor_instant = now;
        self.bpm = bpm.clamp(1.0, 999.0);
        log::debug!("[TRANSPORT] tempo set to {} bpm", self.bpm);
    }

    /// Get the current time signature.
    pub fn time_signature(&self) -> TimeSignature {
        self.signature
    }

    /// Set the time signature, preserving the current beat position.
    pub fn set_time_signature(&mut self, numerator: u32, denominator: u32, now: Instant) {
        self.anchor_beat = self.beat_at(now);
        self.anchor_instant = now;
        self.signature = TimeSignature::new(numerator, denominator);
    }

    /// Tempo and signature for resolving musical time.
    pub fn time_context(&self) -> TimeContext {
        TimeContext {
            bpm: self.bpm,
            signature: self.signature,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Check if the transport is running.
    pub fn is_running(&self) -> bool {
        self.state == TransportState::Started
    }

    /// Start (or resume) playback from the current position.
    pub fn start(&mut self, now: Instant) {
        if self.state == TransportState::Started {
            return;
        }
        self.anchor_instant = now;
        self.state = TransportState::Started;
        log::debug!("[TRANSPORT] started at beat {:.3}", self.anchor_beat.to_float());
    }

    /// Pause playback, preserving the current position and pending callbacks.
    pub fn pause(&mut self, now: Instant) {
        if self.state != TransportState::Started {
            return;
        }
        self.anchor_beat = self.beat_at(now);
        self.anchor_instant = now;
        self.state = TransportState::Paused;
        log::debug!("[TRANSPORT] paused at beat {:.3}", self.anchor_beat.to_float());
    }

    /// Stop playback: pause, cancel every pending callback, rewind to zero.
    pub fn stop(&mut self, now: Instant) {
        self.state = TransportState::Stopped;
        self.anchor_beat = BeatTime::ZERO;
        self.anchor_instant = now;
        let cancelled = self.cancel();
        log::debug!("[TRANSPORT] stopped ({} callbacks cancelled)", cancelled);
    }

    /// Cancel every pending callback without touching the run state.
    ///
    /// Returns the number of callbacks dropped.
    pub fn cancel(&mut self) -> usize {
        let cancelled = self.queue.len();
        self.queue.clear();
        cancelled
    }

    /// Move the playback position.
    pub fn set_position(&mut self, beat: BeatTime, now: Instant) {
        self.anchor_beat = beat;
        self.anchor_instant = now;
    }

    /// Playback position at the given instant.
    pub fn position(&self, now: Instant) -> BeatTime {
        self.beat_at(now)
    }

    /// Playback position in seconds at the current tempo.
    pub fn seconds(&self, now: Instant) -> f64 {
        self.time_context().beats_to_seconds(self.beat_at(now).to_float())
    }

    fn beat_at(&self, time: Instant) -> BeatTime {
        if self.state != TransportState::Started || time <= self.anchor_instant {
            return self.anchor_beat;
        }

        let elapsed = time.duration_since(self.anchor_instant).as_secs_f64();
        let beats_elapsed = (elapsed / 60.0) * self.bpm;
        self.anchor_beat + BeatTime::from_float(beats_elapsed)
    }

    /// Queue a one-shot callback at an absolute beat position.
    pub fn schedule_once(&mut self, at: BeatTime, payload: J) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.insert((at, id), payload);
        id
    }

    /// Remove a pending callback. Returns its payload if it was still queued.
    pub fn clear(&mut self, id: EventId) -> Option<J> {
        let key = self.queue.keys().find(|(_, queued)| *queued == id).copied()?;
        self.queue.remove(&key)
    }

    /// Number of callbacks still queued.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Remove and return every callback whose beat has been reached, in
    /// beat order (ties keep scheduling order).
    ///
    /// Nothing is due while the transport is not running.
    pub fn take_due(&mut self, now: Instant) -> Vec<(BeatTime, J)> {
        if !self.is_running() || self.queue.is_empty() {
            return Vec::new();
        }

        let bound = (self.beat_at(now) + BeatTime::EPSILON, EventId(0));
        let later = self.queue.split_off(&bound);
        let due = std::mem::replace(&mut self.queue, later);
        due.into_iter().map(|((beat, _), payload)| (beat, payload)).collect()
    }

    /// Instant at which the earliest pending callback becomes due.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if !self.is_running() {
            return None;
        }
        let (first, _) = self.queue.keys().next()?;
        let current = self.beat_at(now);
        if *first <= current {
            return Some(now);
        }
        let seconds = self
            .time_context()
            .beats_to_seconds((*first - current).to_float());
        // Unrepresentable deadlines never come due
        Duration::try_from_secs_f64(seconds)
            .ok()
            .and_then(|wait| now.checked_add(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_transport_defaults() {
        let transport: Transport<()> = Transport::new(140.0, Instant::now());
        assert!((transport.bpm() - 140.0).abs() < 0.001);
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_position_advances_only_while_started() {
        let t0 = Instant::now();
        let mut transport: Transport<()> = Transport::new(120.0, t0);
        assert_eq!(transport.position(t0 + ms(500)), BeatTime::ZERO);

        transport.start(t0);
        // At 120 BPM, 1 beat = 0.5 seconds
        assert!((transport.position(t0 + ms(500)).to_float() - 1.0).abs() < 0.001);
        assert!((transport.seconds(t0 + ms(500)) - 0.5).abs() < 0.001);

        transport.pause(t0 + ms(500));
        assert!((transport.position(t0 + ms(2000)).to_float() - 1.0).abs() < 0.001);

        transport.start(t0 + ms(2000));
        assert!((transport.position(t0 + ms(2500)).to_float() - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_stop_rewinds_and_cancels() {
        let t0 = Instant::now();
        let mut transport = Transport::new(120.0, t0);
        transport.schedule_once(BeatTime::from_float(4.0), "later");
        transport.start(t0);

        transport.stop(t0 + ms(1000));
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.position(t0 + ms(1000)), BeatTime::ZERO);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_cancel_keeps_position() {
        let t0 = Instant::now();
        let mut transport = Transport::new(120.0, t0);
        transport.schedule_once(BeatTime::from_float(4.0), 1);
        transport.schedule_once(BeatTime::from_float(8.0), 2);
        transport.start(t0);

        assert_eq!(transport.cancel(), 2);
        assert!(transport.is_running());
        assert!((transport.position(t0 + ms(500)).to_float() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_set_bpm_preserves_position() {
        let t0 = Instant::now();
        let mut transport: Transport<()> = Transport::new(120.0, t0);
        transport.start(t0);
        transport.set_bpm(60.0, t0 + ms(1000));
        // 2 beats at 120, then 1 more beat per second at 60
        assert!((transport.position(t0 + ms(2000)).to_float() - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_set_position_and_signature() {
        let t0 = Instant::now();
        let mut transport = Transport::new(60.0, t0);
        transport.set_position(BeatTime::from_float(3.0), t0);
        transport.schedule_once(BeatTime::from_float(3.5), "x");
        transport.start(t0);
        assert!((transport.seconds(t0) - 3.0).abs() < 0.001);
        assert_eq!(transport.take_due(t0 + ms(500)).len(), 1);

        transport.set_time_signature(3, 4, t0 + ms(500));
        assert_eq!(transport.time_signature(), TimeSignature::new(3, 4));
        let ctx = transport.time_context();
        assert!((ctx.to_beats(&"1m".parse().unwrap()) - 3.0).abs() < 0.001);
        assert!((transport.position(t0 + ms(1000)).to_float() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_bpm_is_clamped() {
        let t0 = Instant::now();
        let mut transport: Transport<()> = Transport::new(0.0, t0);
        assert!((transport.bpm() - 1.0).abs() < 0.001);
        transport.set_bpm(5000.0, t0);
        assert!((transport.bpm() - 999.0).abs() < 0.001);
    }

    #[test]
    fn test_take_due_in_beat_order() {
        let t0 = Instant::now();
        let mut transport = Transport::new(120.0, t0);
        transport.schedule_once(BeatTime::from_float(1.0), "b");
        transport.schedule_once(BeatTime::from_float(0.0), "a");
        transport.schedule_once(BeatTime::from_float(1.0), "c");
        transport.schedule_once(BeatTime::from_float(2.0), "d");

        // Nothing fires before start
        assert!(transport.take_due(t0 + ms(5000)).is_empty());

        transport.start(t0);
        let due: Vec<_> = transport
            .take_due(t0 + ms(500))
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(due, vec!["a", "b", "c"]);
        assert_eq!(transport.pending(), 1);

        let due = transport.take_due(t0 + ms(1000));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, "d");
    }

    #[test]
    fn test_clear_single_callback() {
        let t0 = Instant::now();
        let mut transport = Transport::new(120.0, t0);
        let keep = transport.schedule_once(BeatTime::from_float(1.0), "keep");
        let drop = transport.schedule_once(BeatTime::from_float(1.0), "drop");
        assert_eq!(transport.clear(drop), Some("drop"));
        assert_eq!(transport.clear(drop), None);
        assert_eq!(transport.pending(), 1);
        assert_ne!(keep, drop);
    }

    #[test]
    fn test_next_deadline() {
        let t0 = Instant::now();
        let mut transport = Transport::new(120.0, t0);
        transport.schedule_once(BeatTime::from_float(2.0), ());
        assert_eq!(transport.next_deadline(t0), None);

        transport.start(t0);
        let deadline = transport.next_deadline(t0).unwrap();
        assert!((deadline.duration_since(t0).as_secs_f64() - 1.0).abs() < 0.001);

        // Overdue callbacks are due immediately
        let late = t0 + ms(3000);
        assert_eq!(transport.next_deadline(late), Some(late));
    }

    #[test]
    fn test_far_deadline_does_not_overflow() {
        let t0 = Instant::now();
        let mut transport = Transport::new(1.0, t0);
        transport.schedule_once(BeatTime::from_float(f64::MAX), ());
        transport.start(t0);

        if let Some(deadline) = transport.next_deadline(t0) {
            assert!(deadline > t0 + Duration::from_secs(86_400));
        }
        assert!(transport.take_due(t0 + ms(1000)).is_empty());
    }
}
