//! Group lifecycle.
//!
//! Turns group-node creation and removal in the store into
//! `WEB_RESOURCE_CREATED` / `WEB_RESOURCE_DELETED` bus events, and reacts to
//! them: a new group is indexed, watched and compiled; a removed one is
//! forgotten.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, select};

use super::sweep::InvalidationScheduler;
use crate::bus::{BusEvent, EventBus};
use crate::error::StoreError;
use crate::inventory::InventoryIndex;
use crate::store::{ContentStore, Observation, StoreEvent, StoreEventKind};
use crate::{debug, log};

pub struct GroupLifecycle {
    store: Arc<dyn ContentStore>,
    inventory: Arc<InventoryIndex>,
    scheduler: Arc<InvalidationScheduler>,
    bus: EventBus,
    events_tx: Sender<StoreEvent>,
    events_rx: Receiver<StoreEvent>,
}

impl GroupLifecycle {
    pub fn new(
        store: Arc<dyn ContentStore>,
        inventory: Arc<InventoryIndex>,
        scheduler: Arc<InvalidationScheduler>,
        bus: EventBus,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            store,
            inventory,
            scheduler,
            bus,
            events_tx,
            events_rx,
        }
    }

    /// Subscribe to the whole store.
    pub fn observe(&self) -> Result<Observation, StoreError> {
        self.store.observe("/", self.events_tx.clone())
    }

    /// Bus event for a store notification, if it concerns a group node.
    pub fn translate(&self, event: &StoreEvent) -> Option<BusEvent> {
        match event.kind {
            StoreEventKind::GroupAdded => Some(BusEvent::Created {
                path: event.path.clone(),
            }),
            StoreEventKind::GroupRemoved => {
                let name = self.inventory.name_at(&event.path)?;
                Some(BusEvent::Deleted {
                    path: event.path.clone(),
                    name,
                })
            }
            _ => None,
        }
    }

    /// Bus handler for `WEB_RESOURCE_CREATED` and `WEB_RESOURCE_DELETED`.
    pub fn handle(&self, event: &BusEvent) {
        match event {
            BusEvent::Created { path } => self.on_created(path),
            BusEvent::Deleted { path, name } => {
                self.inventory.remove(name);
                self.scheduler.unwatch(path);
                log!("watch"; "group {} removed ({})", name, path);
            }
            BusEvent::Compile { .. } | BusEvent::CompileAll => {}
        }
    }

    fn on_created(&self, path: &str) {
        let record = match self.store.group(path) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("watch"; "group at {} vanished before indexing", path);
                return;
            }
            Err(e) => {
                log!("error"; "cannot read new group {}: {}", path, e);
                return;
            }
        };

        self.inventory.register(&record);
        if let Err(e) = self.scheduler.watch(&record) {
            log!("watch"; "cannot subscribe to {}: {}", path, e);
        }
        log!("watch"; "group {} added ({})", record.name, path);
        self.bus.publish(BusEvent::Compile {
            paths: vec![record.path],
        });
    }

    /// Start the translation thread. It stops when `shutdown` disconnects.
    pub fn spawn(self: &Arc<Self>, shutdown: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("webresource-lifecycle".into())
            .spawn(move || this.run(shutdown))
    }

    fn run(&self, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(self.events_rx) -> msg => {
                    let Ok(event) = msg else { break };
                    if let Some(bus_event) = self.translate(&event) {
                        self.bus.publish(bus_event);
                    }
                }
                recv(shutdown) -> _ => break,
            }
        }
    }
}
