//! Time-bounded key highlighting.
//!
//! Two kinds of highlight state are tracked independently: momentary
//! clicks, and a small fixed number of numbered groups used by melody
//! playback. Every highlight is its own entry with its own expiry, so the
//! same note highlighted twice stays lit until the later entry expires.
//!
//! The tracker is a plain state machine. The owner calls
//! [`HighlightTracker::expire`] at (or after) [`HighlightTracker::next_expiry`].

use crate::pitch::Pitch;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// How long a momentary click stays lit.
pub const DEFAULT_CLICK_HIGHLIGHT_MS: u64 = 180;

/// Number of highlight groups.
pub const DEFAULT_GROUP_COUNT: usize = 2;

/// Added to a melody event's duration when lighting its keys.
pub const DEFAULT_MELODY_GRACE_MS: u64 = 80;

/// Lifetime of one highlight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HighlightDuration {
    For(Duration),
    /// Lit until explicitly cleared.
    Forever,
}

impl HighlightDuration {
    /// Interpret a millisecond count, where `f64::INFINITY` means forever.
    pub fn from_millis(ms: f64) -> Self {
        if ms.is_infinite() && ms > 0.0 {
            HighlightDuration::Forever
        } else if ms.is_finite() && ms > 0.0 {
            HighlightDuration::For(Duration::from_micros((ms * 1000.0).round() as u64))
        } else {
            HighlightDuration::For(Duration::ZERO)
        }
    }
}

impl From<Duration> for HighlightDuration {
    fn from(duration: Duration) -> Self {
        HighlightDuration::For(duration)
    }
}

/// Identity of a single highlight entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

#[derive(Clone, Debug, PartialEq)]
pub struct HighlightEntry {
    pub id: EntryId,
    pub note: Pitch,
    /// `None` when the entry never expires.
    pub release_at: Option<Instant>,
    /// Group index, `None` for clicks.
    pub group: Option<usize>,
}

#[derive(Debug)]
pub struct HighlightTracker {
    clicked: Vec<HighlightEntry>,
    groups: Vec<Vec<HighlightEntry>>,
    timers: BinaryHeap<Reverse<(Instant, EntryId)>>,
    next_id: u64,
}

impl Default for HighlightTracker {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_COUNT)
    }
}

impl HighlightTracker {
    pub fn new(group_count: usize) -> Self {
        Self {
            clicked: Vec::new(),
            groups: vec![Vec::new(); group_count],
            timers: BinaryHeap::new(),
            next_id: 0,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn entry(
        &mut self,
        note: Pitch,
        duration: HighlightDuration,
        group: Option<usize>,
        now: Instant,
    ) -> HighlightEntry {
        let id = EntryId(self.next_id);
        self.next_id += 1;

        let release_at = match duration {
            HighlightDuration::For(d) => match now.checked_add(d) {
                Some(at) => {
                    self.timers.push(Reverse((at, id)));
                    Some(at)
                }
                // Past the end of the clock: lit until cleared
                None => None,
            },
            HighlightDuration::Forever => None,
        };

        HighlightEntry {
            id,
            note,
            release_at,
            group,
        }
    }

    /// Light a clicked key for `duration`.
    pub fn highlight_clicked_note(
        &mut self,
        note: impl Into<Pitch>,
        duration: impl Into<HighlightDuration>,
        now: Instant,
    ) -> EntryId {
        let entry = self.entry(note.into(), duration.into(), None, now);
        let id = entry.id;
        self.clicked.push(entry);
        id
    }

    /// Light a key in one group. Out-of-range groups are ignored.
    pub fn highlight_note_in_group(
        &mut self,
        note: impl Into<Pitch>,
        duration: impl Into<HighlightDuration>,
        group: usize,
        now: Instant,
    ) -> Option<EntryId> {
        if group >= self.groups.len() {
            return None;
        }
        let entry = self.entry(note.into(), duration.into(), Some(group), now);
        let id = entry.id;
        self.groups[group].push(entry);
        Some(id)
    }

    /// Empty one group. Pending expiries for its entries become no-ops.
    pub fn clear_group(&mut self, group: usize) {
        if let Some(entries) = self.groups.get_mut(group) {
            entries.clear();
        }
    }

    /// Empty the clicked collection and every group.
    pub fn clear_all(&mut self) {
        self.clicked.clear();
        for entries in &mut self.groups {
            entries.clear();
        }
    }

    pub fn is_note_clicked(&self, note: &str) -> bool {
        self.clicked.iter().any(|e| e.note == note)
    }

    pub fn is_note_in_group(&self, note: &str, group: usize) -> bool {
        self.groups
            .get(group)
            .map(|entries| entries.iter().any(|e| e.note == note))
            .unwrap_or(false)
    }

    pub fn clicked(&self) -> &[HighlightEntry] {
        &self.clicked
    }

    /// Entries of one group, empty for an out-of-range index.
    pub fn group(&self, group: usize) -> &[HighlightEntry] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Earliest pending expiry, including ones that will turn out to be no-ops.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove every entry whose expiry has been reached.
    ///
    /// Returns how many entries were actually removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(Reverse((at, id))) = self.timers.peek().copied() {
            if at > now {
                break;
            }
            self.timers.pop();
            removed += self.remove(id);
        }
        removed
    }

    fn remove(&mut self, id: EntryId) -> usize {
        let before = self.len();
        self.clicked.retain(|e| e.id != id);
        for entries in &mut self.groups {
            entries.retain(|e| e.id != id);
        }
        before - self.len()
    }

    fn len(&self) -> usize {
        self.clicked.len() + self.groups.iter().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_group_highlight_expires() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_note_in_group("C4", ms(330), 0, t0);

        assert!(tracker.is_note_in_group("C4", 0));
        assert!(!tracker.is_note_in_group("C4", 1));
        assert_eq!(tracker.next_expiry(), Some(t0 + ms(330)));

        assert_eq!(tracker.expire(t0 + ms(329)), 0);
        assert!(tracker.is_note_in_group("C4", 0));
        assert_eq!(tracker.expire(t0 + ms(330)), 1);
        assert!(!tracker.is_note_in_group("C4", 0));
        assert_eq!(tracker.next_expiry(), None);
    }

    #[test]
    fn test_forever_until_cleared() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_note_in_group("E4", HighlightDuration::Forever, 1, t0);
        assert_eq!(tracker.next_expiry(), None);
        tracker.expire(t0 + Duration::from_secs(3600));
        assert!(tracker.is_note_in_group("E4", 1));

        tracker.clear_group(1);
        assert!(!tracker.is_note_in_group("E4", 1));
    }

    #[test]
    fn test_invalid_group_is_ignored() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::new(2);
        assert_eq!(tracker.highlight_note_in_group("C4", ms(100), 2, t0), None);
        assert!(!tracker.is_note_in_group("C4", 2));
        assert!(tracker.group(5).is_empty());
        tracker.clear_group(7);
    }

    #[test]
    fn test_repeated_clicks_are_independent() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_clicked_note("C4", ms(180), t0);
        tracker.highlight_clicked_note("C4", ms(180), t0 + ms(100));
        assert_eq!(tracker.clicked().len(), 2);

        // First click expires, the second keeps the key lit
        assert_eq!(tracker.expire(t0 + ms(180)), 1);
        assert!(tracker.is_note_clicked("C4"));

        assert_eq!(tracker.expire(t0 + ms(280)), 1);
        assert!(!tracker.is_note_clicked("C4"));
    }

    #[test]
    fn test_expiry_after_clear_is_noop() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_note_in_group("G4", ms(100), 0, t0);
        tracker.clear_group(0);
        // Re-lit forever after the clear; the stale timer must not remove it
        tracker.highlight_note_in_group("G4", HighlightDuration::Forever, 0, t0 + ms(50));

        assert_eq!(tracker.expire(t0 + ms(200)), 0);
        assert!(tracker.is_note_in_group("G4", 0));
    }

    #[test]
    fn test_clear_all() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_clicked_note("C4", ms(180), t0);
        tracker.highlight_note_in_group("D4", HighlightDuration::Forever, 0, t0);
        tracker.highlight_note_in_group("E4", ms(500), 1, t0);

        tracker.clear_all();
        assert!(!tracker.is_note_clicked("C4"));
        assert!(!tracker.is_note_in_group("D4", 0));
        assert!(!tracker.is_note_in_group("E4", 1));
        assert_eq!(tracker.expire(t0 + ms(1000)), 0);
    }

    #[test]
    fn test_unrepresentable_expiry_stays_lit() {
        let t0 = Instant::now();
        let mut tracker = HighlightTracker::default();
        tracker.highlight_note_in_group("C4", Duration::MAX, 0, t0);
        tracker.highlight_clicked_note("D4", Duration::MAX, t0);

        assert_eq!(tracker.next_expiry(), None);
        assert_eq!(tracker.group(0)[0].release_at, None);
        assert_eq!(tracker.expire(t0 + Duration::from_secs(86_400)), 0);
        assert!(tracker.is_note_in_group("C4", 0));
        assert!(tracker.is_note_clicked("D4"));
    }

    #[test]
    fn test_duration_from_millis() {
        assert_eq!(HighlightDuration::from_millis(f64::INFINITY), HighlightDuration::Forever);
        assert_eq!(HighlightDuration::from_millis(330.0), HighlightDuration::For(ms(330)));
        assert_eq!(HighlightDuration::from_millis(-5.0), HighlightDuration::For(Duration::ZERO));
    }
}
