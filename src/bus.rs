//! Topic-based event bus.
//!
//! Subscribers are either channels (drained on their own thread) or
//! synchronous handlers called on the publishing thread. Handlers run
//! outside the bus lock, so they may publish in turn.
//!
//! Every subscription is an RAII handle: dropping it unsubscribes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `WEB_RESOURCE_CREATED`
    Created,
    /// `WEB_RESOURCE_DELETED`
    Deleted,
    /// `COMPILE`
    Compile,
    /// `COMPILE_ALL`
    CompileAll,
}

impl Topic {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "WEB_RESOURCE_CREATED",
            Self::Deleted => "WEB_RESOURCE_DELETED",
            Self::Compile => "COMPILE",
            Self::CompileAll => "COMPILE_ALL",
        }
    }
}

/// Event payloads, one variant per topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Created { path: String },
    Deleted { path: String, name: String },
    /// Group paths that need compiling. May be empty.
    Compile { paths: Vec<String> },
    CompileAll,
}

impl BusEvent {
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Created { .. } => Topic::Created,
            Self::Deleted { .. } => Topic::Deleted,
            Self::Compile { .. } => Topic::Compile,
            Self::CompileAll => Topic::CompileAll,
        }
    }
}

pub type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Channel(Sender<BusEvent>),
    Handler(Handler),
}

struct Entry {
    topics: Vec<Topic>,
    subscriber: Subscriber,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    entries: Mutex<FxHashMap<u64, Entry>>,
}

/// Cloneable handle to a shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a channel to `topics`.
    pub fn subscribe(&self, topics: &[Topic]) -> (Subscription, Receiver<BusEvent>) {
        let (tx, rx) = channel::unbounded();
        (self.add(topics, Subscriber::Channel(tx)), rx)
    }

    /// Subscribe a handler called synchronously on the publishing thread.
    pub fn subscribe_with(
        &self,
        topics: &[Topic],
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(topics, Subscriber::Handler(Arc::new(handler)))
    }

    /// Deliver `event` to every subscriber of its topic.
    pub fn publish(&self, event: BusEvent) {
        let topic = event.topic();
        let targets: Vec<Subscriber> = self
            .inner
            .entries
            .lock()
            .values()
            .filter(|entry| entry.topics.contains(&topic))
            .map(|entry| entry.subscriber.clone())
            .collect();

        crate::debug!("bus"; "{} -> {} subscriber(s)", topic.name(), targets.len());
        for target in targets {
            match target {
                Subscriber::Channel(tx) => {
                    let _ = tx.send(event.clone());
                }
                Subscriber::Handler(handler) => handler(&event),
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    fn add(&self, topics: &[Topic], subscriber: Subscriber) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().insert(
            id,
            Entry {
                topics: topics.to_vec(),
                subscriber,
            },
        );
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }
}

/// Live bus subscription; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.entries.lock().remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_channel_receives_only_its_topics() {
        let bus = EventBus::new();
        let (_sub, rx) = bus.subscribe(&[Topic::Compile]);

        bus.publish(BusEvent::CompileAll);
        bus.publish(BusEvent::Compile {
            paths: vec!["/apps/a".into()],
        });

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![BusEvent::Compile {
                paths: vec!["/apps/a".into()]
            }]
        );
    }

    #[test]
    fn test_handler_runs_before_publish_returns() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _sub = bus.subscribe_with(&[Topic::CompileAll, Topic::Compile], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(BusEvent::CompileAll);
        bus.publish(BusEvent::Compile { paths: vec![] });
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_publish() {
        let bus = EventBus::new();
        let (_sub, rx) = bus.subscribe(&[Topic::Compile]);
        let inner = bus.clone();
        let _relay = bus.subscribe_with(&[Topic::Created], move |event| {
            if let BusEvent::Created { path } = event {
                inner.publish(BusEvent::Compile {
                    paths: vec![path.clone()],
                });
            }
        });

        bus.publish(BusEvent::Created {
            path: "/apps/new".into(),
        });
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let (sub, rx) = bus.subscribe(&[Topic::CompileAll]);
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(BusEvent::CompileAll);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Created.name(), "WEB_RESOURCE_CREATED");
        assert_eq!(BusEvent::CompileAll.topic().name(), "COMPILE_ALL");
    }
}
