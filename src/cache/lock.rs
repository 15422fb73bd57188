//! Per-path lock table.
//!
//! One reentrant, FIFO-fair lock per cache path, created on first use and
//! dropped as soon as nobody holds or waits for it.
//!
//! ```text
//! table mutex ──► { path → (Arc<PathLock>, users) }
//!                          │
//!                          └── acquired/released outside the table mutex
//! ```
//!
//! `users` counts holders and waiters. It is only touched under the table
//! mutex, so there is never more than one `PathLock` per path and the entry
//! disappears with its last user.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

struct Entry {
    lock: Arc<PathLock>,
    users: usize,
}

/// Table of path locks keyed by cache path.
#[derive(Default)]
pub struct PathLockTable {
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl PathLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the calling thread holds the lock for `path`.
    ///
    /// Reentrant: a thread already holding `path` gets another guard
    /// immediately. Waiters are served in arrival order.
    pub fn acquire(&self, path: &str) -> PathGuard<'_> {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(path.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(PathLock::default()),
                users: 0,
            });
            entry.users += 1;
            Arc::clone(&entry.lock)
        };

        lock.lock();
        PathGuard {
            table: self,
            path: path.to_string(),
            lock,
            _not_send: PhantomData,
        }
    }

    /// Number of paths currently held or awaited.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, path: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            entry.users -= 1;
            if entry.users == 0 {
                entries.remove(path);
            }
        }
    }
}

/// Holds a path lock until dropped. Must be dropped on the acquiring thread.
pub struct PathGuard<'a> {
    table: &'a PathLockTable,
    path: String,
    lock: Arc<PathLock>,
    _not_send: PhantomData<*const ()>,
}

impl PathGuard<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
        self.table.release(&self.path);
    }
}

// ============================================================================
// PathLock
// ============================================================================

/// Reentrant ticket lock.
#[derive(Default)]
struct PathLock {
    state: Mutex<LockState>,
    turn: Condvar,
}

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
    next_ticket: u64,
    now_serving: u64,
}

impl PathLock {
    fn lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.owner.is_some() || state.now_serving != ticket {
            self.turn.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            state.now_serving += 1;
            self.turn.notify_all();
        }
    }
}
