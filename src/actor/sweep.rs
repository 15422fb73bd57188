//! Invalidation Scheduler
//!
//! Mark-sweep over the known groups: recompute each group's fingerprint,
//! compare it with the stored hash, clear the hash of every group that
//! differs and publish one `COMPILE` event listing exactly those groups.
//!
//! Two triggers drive it:
//!
//! ```text
//! tick(period) ─────────────────────────────► sweep(All)
//! store event ─► notification thread ─► group path ─► sweep(Only(paths))
//! ```
//!
//! The notification thread only maps events to group paths; sweeps and
//! compiles never run on it. Subscriptions are keyed by group path, so a
//! group renamed in place keeps a single subscription.
//!
//! A group that cannot be loaded or fingerprinted is logged and skipped;
//! only an unavailable store aborts the whole sweep.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, select};
use dashmap::DashMap;
use rustc_hash::FxHashSet;

use super::messages::SweepFilter;
use crate::bus::{BusEvent, EventBus};
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::freshness::fingerprint;
use crate::group::Group;
use crate::inventory::InventoryIndex;
use crate::path::{is_within, join};
use crate::store::{
    CACHE_PATH_PROPERTY, ContentStore, GROUP_HASH_PROPERTY, GroupRecord, INVENTORY_NODE,
    Observation, StoreEvent, StoreEventKind,
};
use crate::{debug, log};

/// Subtree subscription held for one group.
struct GroupWatch {
    name: String,
    cache_path: Option<String>,
    _observation: Observation,
}

pub struct InvalidationScheduler {
    store: Arc<dyn ContentStore>,
    inventory: Arc<InventoryIndex>,
    bus: EventBus,
    config: Arc<EngineConfig>,
    /// Group path → live subscription
    watches: DashMap<String, GroupWatch>,
    events_tx: Sender<StoreEvent>,
    events_rx: Receiver<StoreEvent>,
}

impl InvalidationScheduler {
    pub fn new(
        store: Arc<dyn ContentStore>,
        inventory: Arc<InventoryIndex>,
        bus: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            store,
            inventory,
            bus,
            config,
            watches: DashMap::new(),
            events_tx,
            events_rx,
        }
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Run one sweep and publish the changed group paths.
    ///
    /// A store failure aborts the sweep before anything is published; groups
    /// whose hash was already cleared are picked up again by the next one.
    pub fn sweep(&self, filter: &SweepFilter) -> Result<Vec<String>, StoreError> {
        let started = Instant::now();
        let mut seen = 0;
        let mut changed = Vec::new();

        for record in self.store.list_groups()? {
            if !filter.includes(&record.path) {
                continue;
            }
            seen += 1;
            self.inventory.register(&record);
            if let Err(e) = self.watch(&record) {
                log!("watch"; "cannot subscribe to {}: {}", record.path, e);
            }

            let path = record.path.clone();
            match self.check_group(record) {
                Ok(true) => changed.push(path),
                Ok(false) => {}
                Err(e @ StoreError::Unavailable(_)) => return Err(e),
                Err(e) => log!("error"; "group {} skipped: {}", path, e),
            }
        }

        if changed.is_empty() {
            debug!("sweep"; "{} group(s) unchanged in {:?}", seen, started.elapsed());
        } else {
            log!(
                "sweep";
                "{} of {} group(s) need compiling ({:?})",
                changed.len(),
                seen,
                started.elapsed()
            );
        }

        self.bus.publish(BusEvent::Compile {
            paths: changed.clone(),
        });
        Ok(changed)
    }

    /// Whether a group changed since its last compile. Clears a stale hash.
    fn check_group(&self, record: GroupRecord) -> Result<bool, StoreError> {
        let group = Group::load(self.store.as_ref(), record)?;
        let current = fingerprint(self.store.as_ref(), &group)?;
        if group.hash == Some(current) {
            return Ok(false);
        }

        if group.hash.is_some() {
            self.store.set_group_hash(&group.path, None)?;
        }
        debug!("sweep"; "{} changed ({})", group.name, current);
        Ok(true)
    }

    fn run_sweep(&self, filter: &SweepFilter) {
        if let Err(e) = self.sweep(filter) {
            log!("error"; "sweep aborted: {:#}", anyhow::Error::new(e));
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a group's subtree unless already subscribed.
    ///
    /// Returns `false` when subscriptions are disabled in the config.
    pub fn watch(&self, record: &GroupRecord) -> Result<bool, StoreError> {
        if !self.config.scheduler.watch {
            return Ok(false);
        }
        if let Some(mut existing) = self.watches.get_mut(&record.path)
            && existing.cache_path == record.cache_path
        {
            if existing.name != record.name {
                debug!("watch"; "{} renamed {} -> {}", record.path, existing.name, record.name);
                existing.name = record.name.clone();
            }
            return Ok(true);
        }

        let observation = self.store.observe(&record.path, self.events_tx.clone())?;
        self.watches.insert(
            record.path.clone(),
            GroupWatch {
                name: record.name.clone(),
                cache_path: record.cache_path.clone(),
                _observation: observation,
            },
        );
        debug!("watch"; "subscribed to {}", record.path);
        Ok(true)
    }

    /// Drop the subscription of the group at `group_path`.
    pub fn unwatch(&self, group_path: &str) -> bool {
        self.watches.remove(group_path).is_some()
    }

    /// Names of the groups currently subscribed to, sorted.
    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<_> = self.watches.iter().map(|w| w.name.clone()).collect();
        names.sort();
        names
    }

    /// Path of the group a notification should re-sweep, if any.
    pub fn group_for_event(&self, event: &StoreEvent) -> Option<String> {
        if matches!(
            event.kind,
            StoreEventKind::GroupAdded | StoreEventKind::GroupRemoved
        ) {
            return None;
        }

        // innermost group wins
        let watch = self
            .watches
            .iter()
            .filter(|w| is_within(&event.path, w.key()))
            .max_by_key(|w| w.key().len())?;
        if is_self_inflicted(watch.key(), watch.cache_path.as_deref(), event) {
            return None;
        }
        Some(watch.key().clone())
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Start the notification and timer threads. Both stop when `shutdown`
    /// disconnects.
    pub fn spawn(self: &Arc<Self>, shutdown: Receiver<()>) -> std::io::Result<Vec<JoinHandle<()>>> {
        let (trigger_tx, trigger_rx) = channel::unbounded();

        let notifier = {
            let this = Arc::clone(self);
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("webresource-notify".into())
                .spawn(move || this.run_notifications(trigger_tx, shutdown))?
        };
        let timer = {
            let this = Arc::clone(self);
            thread::Builder::new()
                .name("webresource-sweep".into())
                .spawn(move || this.run_timer(trigger_rx, shutdown))?
        };
        Ok(vec![notifier, timer])
    }

    fn run_notifications(&self, triggers: Sender<String>, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(self.events_rx) -> msg => {
                    let Ok(event) = msg else { break };
                    if let Some(group) = self.group_for_event(&event) {
                        debug!("watch"; "{:?} {} -> {}", event.kind, event.path, group);
                        if triggers.send(group).is_err() {
                            break;
                        }
                    }
                }
                recv(shutdown) -> _ => break,
            }
        }
    }

    fn run_timer(&self, triggers: Receiver<String>, shutdown: Receiver<()>) {
        let ticker = channel::tick(self.config.scheduler.period());
        loop {
            select! {
                recv(ticker) -> _ => self.run_sweep(&SweepFilter::All),
                recv(triggers) -> msg => {
                    let Ok(group) = msg else { break };
                    // coalesce notifications that queued up meanwhile
                    let mut groups: FxHashSet<String> = triggers.try_iter().collect();
                    groups.insert(group);
                    self.run_sweep(&SweepFilter::Only(groups));
                }
                recv(shutdown) -> _ => break,
            }
        }
        debug!("sweep"; "stopped");
    }
}

/// Whether an event was caused by the engine's own bookkeeping on a group.
///
/// Covers the group's cache path and hash properties, anything under its
/// inventory node and anything under its cache path override.
pub fn is_self_inflicted(group_path: &str, cache_path: Option<&str>, event: &StoreEvent) -> bool {
    if let StoreEventKind::PropertyChanged(property) = event.kind
        && event.path == group_path
        && (property == CACHE_PATH_PROPERTY || property == GROUP_HASH_PROPERTY)
    {
        return true;
    }
    if is_within(&event.path, &join(group_path, INVENTORY_NODE)) {
        return true;
    }
    cache_path.is_some_and(|cache| is_within(&event.path, cache))
}
