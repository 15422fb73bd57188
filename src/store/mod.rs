//! Content store abstraction.
//!
//! The engine reads sources, writes artifacts and keeps per-group state in a
//! hierarchical, path-addressed store. Two implementations ship with the
//! crate:
//!
//! | Store         | Backing                         | Notifications        |
//! |---------------|---------------------------------|----------------------|
//! | `MemoryStore` | in-process tree                 | emitted on its writes|
//! | `FsStore`     | a directory on disk             | `notify` watcher     |
//!
//! # Module Structure
//!
//! ```text
//! store/
//! ├── observers.rs   # Observation handles, prefix fan-out
//! ├── memory.rs      # MemoryStore
//! ├── fs.rs          # FsStore
//! └── mod.rs         # ContentStore trait, records, events (this file)
//! ```

mod fs;
mod memory;
mod observers;

pub use fs::{FsStore, GROUP_FILE, write_group_file};
pub use memory::MemoryStore;
pub use observers::{Observation, Observers};

use std::collections::BTreeMap;
use std::time::SystemTime;

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::freshness::ContentHash;

/// Child node of a group holding its inventory summary.
pub const INVENTORY_NODE: &str = "inventory";

/// Group property naming the cache path override.
pub const CACHE_PATH_PROPERTY: &str = "cachePath";

/// Group property holding the stored fingerprint.
pub const GROUP_HASH_PROPERTY: &str = "groupHash";

// ============================================================================
// Records
// ============================================================================

/// Compile options keyed by compiler name.
pub type OptionsByCompiler = BTreeMap<String, BTreeMap<String, String>>;

/// A group node as stored, without its membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub path: String,
    pub cache_path: Option<String>,
    pub compile_options: OptionsByCompiler,
    pub hash: Option<ContentHash>,
}

impl GroupRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            cache_path: None,
            compile_options: BTreeMap::new(),
            hash: None,
        }
    }

    pub fn with_cache_path(mut self, cache_path: impl Into<String>) -> Self {
        self.cache_path = Some(cache_path.into());
        self
    }

    pub fn with_option(
        mut self,
        compiler: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.compile_options
            .entry(compiler.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Summary written under a group's inventory node after each compile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    /// Output extension → member artifact paths, in inventory order.
    pub artifacts: BTreeMap<String, Vec<String>>,
    /// Output extension → consolidated artifact path.
    pub consolidated: BTreeMap<String, String>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEventKind {
    Added,
    Changed,
    Removed,
    GroupAdded,
    GroupRemoved,
    /// A named property on the node changed.
    PropertyChanged(&'static str),
}

/// A change notification for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub path: String,
    pub kind: StoreEventKind,
}

impl StoreEvent {
    pub fn new(path: impl Into<String>, kind: StoreEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

// ============================================================================
// ContentStore
// ============================================================================

/// Hierarchical, path-addressed content store.
///
/// Every write is atomic per node. Implementations are shared between the
/// sweep thread, the notification thread and the compile workers.
pub trait ContentStore: Send + Sync {
    /// Raw bytes of a node.
    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Last-modified timestamp, `None` if the node does not exist.
    fn modified(&self, path: &str) -> Result<Option<SystemTime>, StoreError>;

    /// Write a node, creating parents as needed. Returns the new timestamp.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<SystemTime, StoreError>;

    /// Every group node in the store.
    fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError>;

    /// The group node at `path`, if there is one.
    fn group(&self, path: &str) -> Result<Option<GroupRecord>, StoreError>;

    /// Source members of a group in inventory order.
    ///
    /// Excludes the inventory node and anything below the group's cache path.
    fn list_sources(&self, group: &GroupRecord) -> Result<Vec<String>, StoreError>;

    /// Set or clear the stored fingerprint of a group.
    fn set_group_hash(&self, group_path: &str, hash: Option<&ContentHash>)
    -> Result<(), StoreError>;

    /// Replace the inventory summary of a group.
    fn write_inventory(
        &self,
        group_path: &str,
        summary: &InventorySummary,
    ) -> Result<(), StoreError>;

    /// Deliver events for `root` and everything below it to `sink` until the
    /// returned handle is dropped.
    fn observe(&self, root: &str, sink: Sender<StoreEvent>) -> Result<Observation, StoreError>;
}
