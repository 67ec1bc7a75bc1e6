//! Publish/subscribe fan-out of playback events.

use crate::pitch::Pitch;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// A semantic playback event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PianoEvent {
    NotePlayed { note: Pitch },
    ChordPlayed { chord: Vec<Pitch> },
    SequenceEnded,
}

type Listener = Arc<dyn Fn(&PianoEvent) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Listener registry. Clones share the same listeners.
#[derive(Clone, Default)]
pub struct PianoObserver {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for PianoObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PianoObserver")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl PianoObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PianoEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Call every listener in subscription order.
    ///
    /// A panicking listener is logged and skipped. Listeners may subscribe
    /// or unsubscribe from inside the callback; changes apply to the next
    /// notification.
    pub fn notify(&self, event: &PianoEvent) {
        let snapshot: Vec<Listener> = self
            .registry
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::warn!("[OBSERVER] Listener panicked handling {:?}", event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

/// Handle that removes exactly one listener.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the listener. Calling this again has no effect.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
