//! Service - wires up the engine.
//!
//! # Responsibility
//!
//! `Service` is a thin orchestrator that:
//! - Builds the shared store, index, cache and bus
//! - Subscribes the dispatcher and the lifecycle handler to their topics
//! - Runs the initial sweep and starts every thread
//!
//! Compilation logic lives in `cache/`, invalidation in `sweep.rs`.
//!
//! # Architecture
//!
//! ```text
//! store ──events──► notify thread ──► sweep thread ──COMPILE──► dispatcher ──► workers
//!   │                                     ▲                        ▲
//!   └──group nodes──► lifecycle ──CREATED─┘ (watch)   COMPILE_ALL ─┘ (register_compiler)
//! ```

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{self, Sender};

use super::dispatch::BackgroundCompiler;
use super::lifecycle::GroupLifecycle;
use super::messages::SweepFilter;
use super::sweep::InvalidationScheduler;
use crate::bus::{BusEvent, EventBus, Subscription, Topic};
use crate::cache::CompileCache;
use crate::compiler::{Compiler, CompilerRegistry, Processors};
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::inventory::InventoryIndex;
use crate::store::{ContentStore, Observation};
use crate::{debug, log};

/// The running engine.
pub struct Service {
    config: Arc<EngineConfig>,
    store: Arc<dyn ContentStore>,
    bus: EventBus,
    inventory: Arc<InventoryIndex>,
    cache: Arc<CompileCache>,
    dispatcher: Arc<BackgroundCompiler>,
    scheduler: Arc<InvalidationScheduler>,
    lifecycle: Arc<GroupLifecycle>,
    _subscriptions: Vec<Subscription>,
    observation: Option<Observation>,
    /// Dropping it stops every thread
    shutdown_tx: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Service {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn ContentStore>,
        registry: Arc<CompilerRegistry>,
    ) -> Self {
        Self::with_processors(config, store, registry, Arc::new(Processors::new()))
    }

    pub fn with_processors(
        config: Arc<EngineConfig>,
        store: Arc<dyn ContentStore>,
        registry: Arc<CompilerRegistry>,
        processors: Arc<Processors>,
    ) -> Self {
        let bus = EventBus::new();
        let inventory = Arc::new(InventoryIndex::new(Arc::clone(&store)));
        let cache = Arc::new(
            CompileCache::new(
                Arc::clone(&store),
                registry,
                Arc::clone(&inventory),
                config.cache.group_root.clone(),
            )
            .with_processors(processors),
        );
        let dispatcher = Arc::new(BackgroundCompiler::new(
            Arc::clone(&cache),
            Arc::clone(&inventory),
            Arc::clone(&store),
        ));
        let scheduler = Arc::new(InvalidationScheduler::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            bus.clone(),
            Arc::clone(&config),
        ));
        let lifecycle = Arc::new(GroupLifecycle::new(
            Arc::clone(&store),
            Arc::clone(&inventory),
            Arc::clone(&scheduler),
            bus.clone(),
        ));

        let subscriptions = vec![
            subscribe(&bus, &[Topic::Compile, Topic::CompileAll], &dispatcher, |d, e| {
                d.handle(e)
            }),
            subscribe(&bus, &[Topic::Created, Topic::Deleted], &lifecycle, |l, e| {
                l.handle(e)
            }),
        ];

        Self {
            config,
            store,
            bus,
            inventory,
            cache,
            dispatcher,
            scheduler,
            lifecycle,
            _subscriptions: subscriptions,
            observation: None,
            shutdown_tx: None,
            handles: Vec::new(),
        }
    }

    /// Index the groups, run the first sweep and start all threads.
    pub fn start(&mut self) -> Result<()> {
        if self.shutdown_tx.is_some() {
            return Ok(());
        }

        // the store may come up later; the timer sweep catches up then
        match self.inventory.load_all() {
            Ok(count) => log!("serve"; "{} group(s) indexed", count),
            Err(e) => log!("error"; "cannot index groups: {}", e),
        }
        if let Err(e) = self.scheduler.sweep(&SweepFilter::All) {
            log!("error"; "initial sweep failed: {}", e);
        }

        self.observation = Some(
            self.lifecycle
                .observe()
                .context("cannot observe group creation")?,
        );

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let workers = self.config.scheduler.workers;
        self.handles.extend(
            self.dispatcher
                .spawn(workers, shutdown_rx.clone())
                .context("cannot start compile workers")?,
        );
        self.handles.extend(
            self.scheduler
                .spawn(shutdown_rx.clone())
                .context("cannot start sweep threads")?,
        );
        self.handles.push(
            self.lifecycle
                .spawn(shutdown_rx)
                .context("cannot start lifecycle thread")?,
        );
        self.shutdown_tx = Some(shutdown_tx);

        log!(
            "serve";
            "{} worker(s), sweeping every {:?}",
            workers,
            self.config.scheduler.period()
        );
        Ok(())
    }

    /// Stop every thread and wait for them. In-flight compiles finish first.
    pub fn shutdown(&mut self) {
        if self.shutdown_tx.take().is_none() {
            return;
        }
        self.observation = None;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log!("error"; "a worker thread panicked");
            }
        }
        debug!("serve"; "stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Add or replace a compiler. Anything but a pass-through invalidates
    /// every group.
    pub fn register_compiler(&self, compiler: Arc<dyn Compiler>) {
        let passthrough = compiler.is_passthrough();
        log!("compile"; "compiler {} registered", compiler.name());
        self.cache.registry().register(compiler);
        if !passthrough {
            self.bus.publish(BusEvent::CompileAll);
        }
    }

    pub fn unregister_compiler(&self, name: &str) -> bool {
        self.cache.registry().unregister(name)
    }

    /// Sweep every group now, outside the timer.
    pub fn sweep_now(&self) -> Result<Vec<String>, StoreError> {
        self.scheduler.sweep(&SweepFilter::All)
    }

    /// Wait until the compile queue drains. Returns whether it did.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle_timeout(timeout)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn inventory(&self) -> &Arc<InventoryIndex> {
        &self.inventory
    }

    pub fn cache(&self) -> &Arc<CompileCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<BackgroundCompiler> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<InvalidationScheduler> {
        &self.scheduler
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Subscribe a handler holding only a weak reference to its target.
fn subscribe<T: Send + Sync + 'static>(
    bus: &EventBus,
    topics: &[Topic],
    target: &Arc<T>,
    handle: fn(&T, &BusEvent),
) -> Subscription {
    let target: Weak<T> = Arc::downgrade(target);
    bus.subscribe_with(topics, move |event| {
        if let Some(target) = target.upgrade() {
            handle(&target, event);
        }
    })
}
