//! In-process content store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use crossbeam::channel::Sender;
use parking_lot::RwLock;

use super::{
    CACHE_PATH_PROPERTY, ContentStore, GROUP_HASH_PROPERTY, GroupRecord, INVENTORY_NODE,
    InventorySummary, Observation, Observers, StoreEvent, StoreEventKind,
};
use crate::error::StoreError;
use crate::freshness::ContentHash;
use crate::path::{is_within, join};

struct Node {
    bytes: Vec<u8>,
    modified: SystemTime,
}

#[derive(Default)]
struct Tree {
    files: BTreeMap<String, Node>,
    groups: BTreeMap<String, GroupRecord>,
    inventories: BTreeMap<String, InventorySummary>,
}

/// Content store held entirely in memory.
///
/// Writes notify observers the same way a persistent store would, so the
/// scheduler behaves identically on top of it. `set_unavailable` makes every
/// operation fail until it is cleared.
pub struct MemoryStore {
    tree: RwLock<Tree>,
    observers: Arc<Observers>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            observers: Observers::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    // === Direct manipulation ===

    /// Create or replace a file stamped with the current time.
    pub fn put_file(&self, path: &str, bytes: &[u8]) -> SystemTime {
        self.put_file_at(path, bytes, SystemTime::now())
    }

    /// Create or replace a file with an explicit timestamp.
    pub fn put_file_at(&self, path: &str, bytes: &[u8], modified: SystemTime) -> SystemTime {
        let existed = self
            .tree
            .write()
            .files
            .insert(
                path.to_string(),
                Node {
                    bytes: bytes.to_vec(),
                    modified,
                },
            )
            .is_some();
        let kind = if existed {
            StoreEventKind::Changed
        } else {
            StoreEventKind::Added
        };
        self.observers.dispatch(&StoreEvent::new(path, kind));
        modified
    }

    /// Move a file's timestamp without touching its content.
    pub fn touch(&self, path: &str, modified: SystemTime) -> bool {
        let touched = match self.tree.write().files.get_mut(path) {
            Some(node) => {
                node.modified = modified;
                true
            }
            None => false,
        };
        if touched {
            self.observers
                .dispatch(&StoreEvent::new(path, StoreEventKind::Changed));
        }
        touched
    }

    pub fn remove(&self, path: &str) -> bool {
        let removed = self.tree.write().files.remove(path).is_some();
        if removed {
            self.observers
                .dispatch(&StoreEvent::new(path, StoreEventKind::Removed));
        }
        removed
    }

    pub fn create_group(&self, record: GroupRecord) {
        let path = record.path.clone();
        self.tree.write().groups.insert(path.clone(), record);
        self.observers
            .dispatch(&StoreEvent::new(path, StoreEventKind::GroupAdded));
    }

    /// Remove a group node together with its inventory summary.
    pub fn remove_group(&self, path: &str) -> Option<GroupRecord> {
        let removed = {
            let mut tree = self.tree.write();
            tree.inventories.remove(path);
            tree.groups.remove(path)
        };
        if removed.is_some() {
            self.observers
                .dispatch(&StoreEvent::new(path, StoreEventKind::GroupRemoved));
        }
        removed
    }

    pub fn set_cache_path(&self, group_path: &str, cache_path: Option<&str>) {
        if let Some(group) = self.tree.write().groups.get_mut(group_path) {
            group.cache_path = cache_path.map(str::to_string);
        }
        self.observers.dispatch(&StoreEvent::new(
            group_path,
            StoreEventKind::PropertyChanged(CACHE_PATH_PROPERTY),
        ));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    // === Inspection ===

    pub fn contains(&self, path: &str) -> bool {
        self.tree.read().files.contains_key(path)
    }

    pub fn inventory(&self, group_path: &str) -> Option<InventorySummary> {
        self.tree.read().inventories.get(group_path).cloned()
    }

    pub fn group_hash(&self, group_path: &str) -> Option<ContentHash> {
        self.tree.read().groups.get(group_path)?.hash
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl ContentStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.check()?;
        self.tree
            .read()
            .files
            .get(path)
            .map(|node| node.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn modified(&self, path: &str) -> Result<Option<SystemTime>, StoreError> {
        self.check()?;
        Ok(self.tree.read().files.get(path).map(|node| node.modified))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<SystemTime, StoreError> {
        self.check()?;
        Ok(self.put_file(path, bytes))
    }

    fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError> {
        self.check()?;
        Ok(self.tree.read().groups.values().cloned().collect())
    }

    fn group(&self, path: &str) -> Result<Option<GroupRecord>, StoreError> {
        self.check()?;
        Ok(self.tree.read().groups.get(path).cloned())
    }

    fn list_sources(&self, group: &GroupRecord) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let inventory = join(&group.path, INVENTORY_NODE);
        let tree = self.tree.read();
        let members = tree
            .files
            .keys()
            .filter(|path| is_within(path, &group.path) && *path != &group.path)
            .filter(|path| !is_within(path, &inventory))
            .filter(|path| {
                group
                    .cache_path
                    .as_deref()
                    .is_none_or(|cache| !is_within(path, cache))
            })
            .cloned()
            .collect();
        Ok(members)
    }

    fn set_group_hash(
        &self,
        group_path: &str,
        hash: Option<&ContentHash>,
    ) -> Result<(), StoreError> {
        self.check()?;
        {
            let mut tree = self.tree.write();
            let group = tree
                .groups
                .get_mut(group_path)
                .ok_or_else(|| StoreError::NotFound(group_path.to_string()))?;
            group.hash = hash.copied();
        }
        self.observers.dispatch(&StoreEvent::new(
            group_path,
            StoreEventKind::PropertyChanged(GROUP_HASH_PROPERTY),
        ));
        Ok(())
    }

    fn write_inventory(
        &self,
        group_path: &str,
        summary: &InventorySummary,
    ) -> Result<(), StoreError> {
        self.check()?;
        {
            let mut tree = self.tree.write();
            if !tree.groups.contains_key(group_path) {
                return Err(StoreError::NotFound(group_path.to_string()));
            }
            tree.inventories
                .insert(group_path.to_string(), summary.clone());
        }
        self.observers.dispatch(&StoreEvent::new(
            join(group_path, INVENTORY_NODE),
            StoreEventKind::Changed,
        ));
        Ok(())
    }

    fn observe(&self, root: &str, sink: Sender<StoreEvent>) -> Result<Observation, StoreError> {
        Ok(self.observers.register(root, sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_read_write_roundtrip_sets_timestamp() {
        let store = MemoryStore::new();
        let before = SystemTime::now();
        let modified = store.write("/a/b.js", b"x").unwrap();

        assert!(modified >= before);
        assert_eq!(store.read("/a/b.js").unwrap(), b"x");
        assert_eq!(store.modified("/a/b.js").unwrap(), Some(modified));
        assert_eq!(store.modified("/missing").unwrap(), None);
        assert!(matches!(store.read("/missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_sources_excludes_state_and_cache() {
        let store = MemoryStore::new();
        let record = GroupRecord::new("site", "/apps/site").with_cache_path("/apps/site/out");
        store.create_group(record.clone());
        store.put_file("/apps/site/b.js", b"B");
        store.put_file("/apps/site/a.js", b"A");
        store.put_file("/apps/site/out/a.js", b"compiled");
        store.put_file("/apps/site/inventory/js", b"x");
        store.put_file("/apps/sitex/c.js", b"C");

        let members = store.list_sources(&record).unwrap();
        assert_eq!(members, vec!["/apps/site/a.js", "/apps/site/b.js"]);
    }

    #[test]
    fn test_group_hash_and_inventory() {
        let store = MemoryStore::new();
        store.create_group(GroupRecord::new("site", "/apps/site"));
        let hash = ContentHash::new([7; 32]);

        store.set_group_hash("/apps/site", Some(&hash)).unwrap();
        assert_eq!(store.group_hash("/apps/site"), Some(hash));
        store.set_group_hash("/apps/site", None).unwrap();
        assert_eq!(store.group_hash("/apps/site"), None);

        let summary = InventorySummary::default();
        store.write_inventory("/apps/site", &summary).unwrap();
        assert_eq!(store.inventory("/apps/site"), Some(summary));
        assert!(store.set_group_hash("/apps/none", None).is_err());
    }

    #[test]
    fn test_events_reach_subtree_observers() {
        let store = MemoryStore::new();
        store.create_group(GroupRecord::new("site", "/apps/site"));
        let (tx, rx) = unbounded();
        let observation = store.observe("/apps/site", tx).unwrap();

        store.put_file("/apps/site/a.js", b"A");
        store.touch("/apps/site/a.js", SystemTime::now() + Duration::from_secs(1));
        store.put_file("/elsewhere.js", b"");
        store
            .set_group_hash("/apps/site", Some(&ContentHash::new([1; 32])))
            .unwrap();

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StoreEventKind::Added,
                StoreEventKind::Changed,
                StoreEventKind::PropertyChanged(GROUP_HASH_PROPERTY),
            ]
        );

        drop(observation);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.put_file("/a.js", b"A");
        store.set_unavailable(true);

        assert!(matches!(store.read("/a.js"), Err(StoreError::Unavailable(_))));
        assert!(store.list_groups().is_err());
        store.set_unavailable(false);
        assert!(store.read("/a.js").is_ok());
    }
}
