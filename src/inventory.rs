//! Group name → group path index.
//!
//! Only the name lookup is kept in memory. Membership is read from the store
//! each time a group is loaded, so it always reflects the latest content.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{CacheError, StoreError};
use crate::group::Group;
use crate::store::{ContentStore, GroupRecord};

pub struct InventoryIndex {
    store: Arc<dyn ContentStore>,
    groups: DashMap<String, String>,
}

impl InventoryIndex {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            groups: DashMap::new(),
        }
    }

    /// Rebuild the index from every group in the store.
    pub fn load_all(&self) -> Result<usize, StoreError> {
        let records = self.store.list_groups()?;
        self.groups
            .retain(|name, _| records.iter().any(|r| &r.name == name));
        for record in &records {
            self.register(record);
        }
        Ok(records.len())
    }

    pub fn register(&self, record: &GroupRecord) {
        // a renamed group keeps its path; drop the old name
        self.groups
            .retain(|name, path| *path != record.path || *name == record.name);
        self.groups.insert(record.name.clone(), record.path.clone());
    }

    /// Forget a group by name. Returns its path.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.groups.remove(name).map(|(_, path)| path)
    }

    /// Name of the group registered at `path`.
    pub fn name_at(&self, path: &str) -> Option<String> {
        self.groups
            .iter()
            .find(|entry| entry.value() == path)
            .map(|entry| entry.key().clone())
    }

    pub fn group_path(&self, name: &str) -> Option<String> {
        self.groups.get(name).map(|path| path.clone())
    }

    /// Every known group path, sorted.
    pub fn group_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.groups.iter().map(|e| e.value().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Snapshot the named group.
    pub fn load_group(&self, name: &str) -> Result<Group, CacheError> {
        let path = self
            .group_path(name)
            .ok_or_else(|| CacheError::UnknownGroup(name.to_string()))?;
        self.load_group_at(&path)
    }

    /// Snapshot the group stored at `path`.
    pub fn load_group_at(&self, path: &str) -> Result<Group, CacheError> {
        let record = self
            .store
            .group(path)?
            .ok_or_else(|| CacheError::UnknownGroup(path.to_string()))?;
        Ok(Group::load(self.store.as_ref(), record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, InventoryIndex) {
        let store = Arc::new(MemoryStore::new());
        let index = InventoryIndex::new(store.clone());
        (store, index)
    }

    #[test]
    fn test_load_all_registers_groups() {
        let (store, index) = setup();
        store.create_group(GroupRecord::new("b", "/apps/b"));
        store.create_group(GroupRecord::new("a", "/apps/a"));

        assert_eq!(index.load_all().unwrap(), 2);
        assert_eq!(index.group_path("a").as_deref(), Some("/apps/a"));
        assert_eq!(index.group_paths(), vec!["/apps/a", "/apps/b"]);
        assert_eq!(index.name_at("/apps/b").as_deref(), Some("b"));

        store.remove_group("/apps/b");
        index.load_all().unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_register_rename_replaces_old_name() {
        let (_store, index) = setup();
        index.register(&GroupRecord::new("old", "/apps/g"));
        index.register(&GroupRecord::new("new", "/apps/g"));
        assert!(index.group_path("old").is_none());
        assert_eq!(index.group_path("new").as_deref(), Some("/apps/g"));
    }

    #[test]
    fn test_load_group_reflects_current_members() {
        let (store, index) = setup();
        store.create_group(GroupRecord::new("site", "/apps/site"));
        index.load_all().unwrap();
        store.put_file("/apps/site/a.js", b"A");

        let group = index.load_group("site").unwrap();
        assert_eq!(group.members, vec!["/apps/site/a.js"]);

        store.put_file("/apps/site/b.js", b"B");
        assert_eq!(index.load_group("site").unwrap().members.len(), 2);
    }

    #[test]
    fn test_unknown_group() {
        let (_store, index) = setup();
        assert!(matches!(
            index.load_group("nope"),
            Err(CacheError::UnknownGroup(_))
        ));
        assert!(matches!(
            index.load_group_at("/apps/nope"),
            Err(CacheError::UnknownGroup(_))
        ));
        assert!(index.remove("nope").is_none());
    }
}
