//! Observer registry shared by store implementations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::StoreEvent;
use crate::path::is_within;

struct Observer {
    root: String,
    sink: Sender<StoreEvent>,
}

/// Subtree subscriptions keyed by an opaque id.
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    entries: Mutex<FxHashMap<u64, Observer>>,
}

impl Observers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe `sink` to `root`. The subscription lives as long as the handle.
    pub fn register(self: &Arc<Self>, root: &str, sink: Sender<StoreEvent>) -> Observation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            Observer {
                root: root.to_string(),
                sink,
            },
        );
        Observation {
            id,
            root: root.to_string(),
            registry: Arc::downgrade(self),
        }
    }

    /// Fan an event out to every observer whose root covers its path.
    ///
    /// Observers whose receiver is gone are dropped.
    pub fn dispatch(&self, event: &StoreEvent) {
        let mut entries = self.entries.lock();
        entries.retain(|_, observer| {
            if !is_within(&event.path, &observer.root) {
                return true;
            }
            observer.sink.send(event.clone()).is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }
}

/// Live subscription to a store subtree; dropping it unsubscribes.
pub struct Observation {
    id: u64,
    root: String,
    registry: Weak<Observers>,
}

impl Observation {
    pub fn root(&self) -> &str {
        &self.root
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observation")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}
