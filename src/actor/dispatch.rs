//! Background Compile Dispatcher
//!
//! A fixed pool of worker threads compiling whole groups.
//!
//! ```text
//! COMPILE {paths}  ──► Job::Group(path) per path ─┐
//! COMPILE_ALL      ──► Job::All ──(at pickup)─────┴─► queue ─► workers
//! ```
//!
//! - **Dedup**: a group path already queued and not yet started is not queued again
//! - **Isolation**: a failing group is logged and skipped, the batch goes on
//! - **Hash last**: the group hash is written only after a successful compile

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, select};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

use super::messages::Job;
use crate::bus::BusEvent;
use crate::cache::{CompileCache, GroupOutput};
use crate::error::CacheError;
use crate::freshness::fingerprint;
use crate::inventory::InventoryIndex;
use crate::store::ContentStore;
use crate::{debug, debug_do, log};

#[derive(Default)]
struct QueueState {
    /// Group paths queued but not yet picked up
    pending: FxHashSet<String>,
    /// A `Job::All` is queued
    all_pending: bool,
    /// Jobs queued or running
    outstanding: usize,
}

pub struct BackgroundCompiler {
    cache: Arc<CompileCache>,
    inventory: Arc<InventoryIndex>,
    store: Arc<dyn ContentStore>,
    queue_tx: Sender<Job>,
    queue_rx: Receiver<Job>,
    state: Mutex<QueueState>,
    idle: Condvar,
}

impl BackgroundCompiler {
    pub fn new(
        cache: Arc<CompileCache>,
        inventory: Arc<InventoryIndex>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        let (queue_tx, queue_rx) = channel::unbounded();
        Self {
            cache,
            inventory,
            store,
            queue_tx,
            queue_rx,
            state: Mutex::new(QueueState::default()),
            idle: Condvar::new(),
        }
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Bus handler for `COMPILE` and `COMPILE_ALL`.
    pub fn handle(&self, event: &BusEvent) {
        match event {
            BusEvent::Compile { paths } => {
                for path in paths {
                    self.enqueue(Job::Group(path.clone()));
                }
            }
            BusEvent::CompileAll => {
                self.enqueue(Job::All);
            }
            BusEvent::Created { .. } | BusEvent::Deleted { .. } => {}
        }
    }

    /// Queue a job. Returns `false` if an identical job is already waiting.
    pub fn enqueue(&self, job: Job) -> bool {
        {
            let mut state = self.state.lock();
            let fresh = match &job {
                Job::Group(path) => state.pending.insert(path.clone()),
                Job::All => !std::mem::replace(&mut state.all_pending, true),
            };
            if !fresh {
                return false;
            }
            state.outstanding += 1;
        }
        // receiver is owned by self, send cannot fail
        let _ = self.queue_tx.send(job);
        true
    }

    /// Jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Block until every queued job has finished.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.idle.wait(&mut state);
        }
    }

    /// Like `wait_idle`, giving up after `timeout`. Returns whether idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.outstanding == 0;
            }
        }
        true
    }

    /// Run queued jobs on the calling thread until the queue is empty.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.queue_rx.try_recv() {
            self.run_job(job);
            ran += 1;
        }
        ran
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Start `workers` threads. They stop when `shutdown` disconnects.
    pub fn spawn(
        self: &Arc<Self>,
        workers: usize,
        shutdown: Receiver<()>,
    ) -> std::io::Result<Vec<JoinHandle<()>>> {
        (0..workers)
            .map(|i| {
                let this = Arc::clone(self);
                let shutdown = shutdown.clone();
                thread::Builder::new()
                    .name(format!("webresource-compile-{i}"))
                    .spawn(move || this.run_worker(shutdown))
            })
            .collect()
    }

    fn run_worker(&self, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(self.queue_rx) -> job => match job {
                    Ok(job) => self.run_job(job),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
    }

    fn run_job(&self, job: Job) {
        match job {
            Job::Group(path) => {
                self.state.lock().pending.remove(&path);
                self.run_group(&path);
            }
            Job::All => {
                self.state.lock().all_pending = false;
                let paths = self.inventory.group_paths();
                debug!("compile"; "compile all: {} group(s)", paths.len());
                for path in paths {
                    self.enqueue(Job::Group(path));
                }
            }
        }
        self.finish();
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    fn run_group(&self, path: &str) {
        // Catch panics so one misbehaving compiler cannot take a worker down
        let result = catch_unwind(AssertUnwindSafe(|| self.compile_group_at(path)));
        let err = match result {
            Ok(Ok(_)) => return,
            Ok(Err(CacheError::UnknownGroup(_))) => {
                debug!("compile"; "{} is gone, skipped", path);
                return;
            }
            Ok(Err(e)) => anyhow::Error::new(e),
            Err(_) => anyhow::anyhow!("compiler panicked"),
        };

        log!("error"; "group {} failed: {:#}", path, err);
        // make sure the next sweep retries it
        if let Err(e) = self.store.set_group_hash(path, None) {
            debug!("compile"; "cannot clear hash of {}: {}", path, e);
        }
    }

    /// Compile and consolidate one group, then persist its inventory summary
    /// and hash.
    ///
    /// The fingerprint is taken before compiling, so an edit that lands
    /// mid-compile still shows up as a change in the next sweep.
    pub fn compile_group_at(&self, path: &str) -> Result<GroupOutput, CacheError> {
        let started = Instant::now();
        let group = self.inventory.load_group_at(path)?;
        let hash = fingerprint(self.store.as_ref(), &group)?;

        let output = self.cache.compile_group(&group, true)?;
        self.store.write_inventory(&group.path, &output.summary())?;
        self.store.set_group_hash(&group.path, Some(&hash))?;

        log!(
            "compile";
            "{}: {} output(s) from {} member(s) in {:?}",
            group.name,
            output.consolidated.len(),
            group.members.len() - output.skipped.len(),
            started.elapsed()
        );
        debug_do! {
            for (ext, target) in &output.consolidated {
                debug!("compile"; "  {} -> {}", ext, target);
            }
        }
        Ok(output)
    }
}
