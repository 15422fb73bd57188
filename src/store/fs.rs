//! Directory-backed content store.
//!
//! Layout, relative to the store root:
//!
//! ```text
//! apps/site/
//! ├── group.toml         # marks a group: name, cache_path, [compile_options.*]
//! ├── .state.json        # stored group hash
//! ├── .inventory.json    # inventory summary
//! ├── a.js
//! └── lib/b.less
//! ```
//!
//! Store path `/apps/site/a.js` maps to `<root>/apps/site/a.js`. Hidden
//! entries are never members and never surface as events; the sidecars are
//! translated into property and inventory events instead.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crossbeam::channel::Sender;
use jwalk::WalkDir;
use notify::event::{MetadataKind, ModifyKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{
    ContentStore, GROUP_HASH_PROPERTY, GroupRecord, INVENTORY_NODE, InventorySummary,
    Observation, Observers, OptionsByCompiler, StoreEvent, StoreEventKind,
};
use crate::error::StoreError;
use crate::freshness::ContentHash;
use crate::path::{is_within, join};

/// File marking a directory as a group.
pub const GROUP_FILE: &str = "group.toml";
const STATE_FILE: &str = ".state.json";
const INVENTORY_FILE: &str = ".inventory.json";

/// `group.toml` contents.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupFile {
    name: String,
    #[serde(default)]
    cache_path: Option<String>,
    #[serde(default)]
    compile_options: OptionsByCompiler,
}

/// `.state.json` contents.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupState {
    hash: Option<String>,
}

/// Content store rooted at a directory.
pub struct FsStore {
    root: PathBuf,
    observers: Arc<Observers>,
    /// Started on the first `observe` call
    watcher: Mutex<Option<RecommendedWatcher>>,
    tmp_counter: AtomicU64,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        fs::create_dir_all(root).map_err(|e| StoreError::io(&display, e))?;
        let root = root
            .canonicalize()
            .map_err(|e| StoreError::io(&display, e))?;
        Ok(Self {
            root,
            observers: Observers::new(),
            watcher: Mutex::new(None),
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a store path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Store path for a host path below the root.
    pub fn store_path(&self, host: &Path) -> Option<String> {
        to_store_path(&self.root, host)
    }

    fn read_group_file(&self, group_path: &str) -> Result<Option<GroupRecord>, StoreError> {
        let file = self.host_path(&join(group_path, GROUP_FILE));
        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(group_path, e)),
        };
        let parsed: GroupFile = toml::from_str(&content)
            .map_err(|e| StoreError::malformed(join(group_path, GROUP_FILE), e))?;

        let hash = self
            .read_json::<GroupState>(&join(group_path, STATE_FILE))?
            .and_then(|state| state.hash)
            .and_then(|hex| ContentHash::from_hex(&hex));

        Ok(Some(GroupRecord {
            name: parsed.name,
            path: normalize_group_path(group_path),
            cache_path: parsed.cache_path,
            compile_options: parsed.compile_options,
            hash,
        }))
    }

    fn read_json<T>(&self, path: &str) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        match fs::read(self.host_path(path)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::malformed(path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn write_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::malformed(path, e))?;
        self.write(path, &bytes).map(|_| ())
    }

    fn ensure_group(&self, group_path: &str) -> Result<(), StoreError> {
        if self.host_path(&join(group_path, GROUP_FILE)).is_file() {
            Ok(())
        } else {
            Err(StoreError::NotFound(group_path.to_string()))
        }
    }

    fn start_watcher(&self) -> Result<(), StoreError> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let observers = Arc::clone(&self.observers);
        let root = self.root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for translated in translate(&root, &event) {
                        crate::debug!("watch"; "{:?} {}", translated.kind, translated.path);
                        observers.dispatch(&translated);
                    }
                }
                Err(e) => crate::log!("watch"; "notify error: {}", e),
            }
        })
        .map_err(|e| StoreError::Unavailable(format!("watcher failed: {e}")))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| StoreError::Unavailable(format!("watcher failed: {e}")))?;
        *slot = Some(watcher);
        Ok(())
    }
}

impl ContentStore for FsStore {
    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.host_path(path)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
            _ => StoreError::io(path, e),
        })
    }

    fn modified(&self, path: &str) -> Result<Option<SystemTime>, StoreError> {
        match fs::metadata(self.host_path(path)) {
            Ok(meta) if meta.is_file() => meta
                .modified()
                .map(Some)
                .map_err(|e| StoreError::io(path, e)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Writes go to a hidden sibling first and are renamed into place.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<SystemTime, StoreError> {
        let target = self.host_path(path);
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::malformed(path, "no parent directory"))?;
        fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;

        let name = target
            .file_name()
            .ok_or_else(|| StoreError::malformed(path, "no file name"))?
            .to_string_lossy();
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!(".{name}.{n}.tmp"));

        fs::write(&tmp, bytes).map_err(|e| StoreError::io(path, e))?;
        if let Err(e) = fs::rename(&tmp, &target) {
            fs::remove_file(&tmp).ok();
            return Err(StoreError::io(path, e));
        }

        fs::metadata(&target)
            .and_then(|meta| meta.modified())
            .map_err(|e| StoreError::io(path, e))
    }

    fn list_groups(&self) -> Result<Vec<GroupRecord>, StoreError> {
        let mut groups = Vec::new();
        for entry in WalkDir::new(&self.root).sort(true) {
            let entry = entry.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name() != GROUP_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent().and_then(|p| self.store_path(p)) else {
                continue;
            };
            // one unreadable group file must not hide the others
            match self.read_group_file(&dir) {
                Ok(Some(record)) => groups.push(record),
                Ok(None) => {}
                Err(e) => crate::log!("error"; "skipping group at {}: {}", dir, e),
            }
        }
        Ok(groups)
    }

    fn group(&self, path: &str) -> Result<Option<GroupRecord>, StoreError> {
        self.read_group_file(path)
    }

    fn list_sources(&self, group: &GroupRecord) -> Result<Vec<String>, StoreError> {
        let dir = self.host_path(&group.path);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(group.path.clone()));
        }

        let inventory = join(&group.path, INVENTORY_NODE);
        let mut nested_groups = Vec::new();
        let mut members = Vec::new();

        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = self.store_path(&entry.path()) else {
                continue;
            };
            if entry.file_name() == GROUP_FILE {
                let owner = crate::path::parent(&path).to_string();
                if owner != group.path {
                    nested_groups.push(owner);
                }
                continue;
            }
            if is_within(&path, &inventory) {
                continue;
            }
            if let Some(cache) = group.cache_path.as_deref()
                && is_within(&path, cache)
            {
                continue;
            }
            members.push(path);
        }

        members.retain(|path| !nested_groups.iter().any(|nested| is_within(path, nested)));
        members.sort();
        Ok(members)
    }

    fn set_group_hash(
        &self,
        group_path: &str,
        hash: Option<&ContentHash>,
    ) -> Result<(), StoreError> {
        self.ensure_group(group_path)?;
        let state = GroupState {
            hash: hash.map(|h| h.to_hex()),
        };
        self.write_json(&join(group_path, STATE_FILE), &state)
    }

    fn write_inventory(
        &self,
        group_path: &str,
        summary: &InventorySummary,
    ) -> Result<(), StoreError> {
        self.ensure_group(group_path)?;
        self.write_json(&join(group_path, INVENTORY_FILE), summary)
    }

    fn observe(&self, root: &str, sink: Sender<StoreEvent>) -> Result<Observation, StoreError> {
        self.start_watcher()?;
        Ok(self.observers.register(root, sink))
    }
}

impl FsStore {
    /// Read back the inventory summary of a group.
    pub fn inventory(&self, group_path: &str) -> Result<Option<InventorySummary>, StoreError> {
        self.read_json(&join(group_path, INVENTORY_FILE))
    }
}

// ============================================================================
// Path mapping
// ============================================================================

fn to_store_path(root: &Path, host: &Path) -> Option<String> {
    let rel = host.strip_prefix(root).ok()?;
    let mut path = String::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => {
                path.push('/');
                path.push_str(segment.to_str()?);
            }
            _ => return None,
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    Some(path)
}

fn normalize_group_path(path: &str) -> String {
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

// ============================================================================
// Event translation
// ============================================================================

/// Translate a raw notify event into store events.
///
/// Group markers become lifecycle events, sidecars become property and
/// inventory events, other hidden entries and directories are dropped.
fn translate(root: &Path, event: &notify::Event) -> Vec<StoreEvent> {
    let base = match event.kind {
        EventKind::Create(_) => StoreEventKind::Added,
        EventKind::Remove(_) => StoreEventKind::Removed,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => return Vec::new(),
        // our own writes land by rename
        EventKind::Modify(ModifyKind::Name(_)) => StoreEventKind::Added,
        EventKind::Modify(_) => StoreEventKind::Changed,
        _ => return Vec::new(),
    };

    let mut events = Vec::new();
    for host in &event.paths {
        if host.is_dir() {
            continue;
        }
        let Some(path) = to_store_path(root, host) else {
            continue;
        };
        // the source side of a rename no longer exists
        let kind = if base != StoreEventKind::Removed && !host.exists() {
            StoreEventKind::Removed
        } else {
            base.clone()
        };

        let name = crate::path::file_name(&path);
        let owner = crate::path::parent(&path);
        let translated = match name {
            GROUP_FILE => match kind {
                StoreEventKind::Added => StoreEvent::new(owner, StoreEventKind::GroupAdded),
                StoreEventKind::Removed => StoreEvent::new(owner, StoreEventKind::GroupRemoved),
                _ => StoreEvent::new(owner, StoreEventKind::Changed),
            },
            STATE_FILE => StoreEvent::new(
                owner,
                StoreEventKind::PropertyChanged(GROUP_HASH_PROPERTY),
            ),
            INVENTORY_FILE => StoreEvent::new(join(owner, INVENTORY_NODE), StoreEventKind::Changed),
            _ if is_hidden(&path) => continue,
            _ => StoreEvent::new(path.clone(), kind),
        };
        events.push(translated);
    }
    events
}

// ============================================================================
// Helpers for building store trees
// ============================================================================

/// Write a `group.toml` for `record` under the store root.
pub fn write_group_file(store: &FsStore, record: &GroupRecord) -> Result<(), StoreError> {
    let mut doc = BTreeMap::new();
    doc.insert("name", toml::Value::String(record.name.clone()));
    if let Some(cache_path) = &record.cache_path {
        doc.insert("cache_path", toml::Value::String(cache_path.clone()));
    }
    if !record.compile_options.is_empty() {
        let options = toml::Value::try_from(&record.compile_options)
            .map_err(|e| StoreError::malformed(&record.path, e))?;
        doc.insert("compile_options", options);
    }
    let content = toml::to_string(&doc).map_err(|e| StoreError::malformed(&record.path, e))?;
    store
        .write(&join(&record.path, GROUP_FILE), content.as_bytes())
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn open() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn make_event(paths: Vec<PathBuf>, kind: EventKind) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_write_read_modified() {
        let (_dir, store) = open();
        let modified = store.write("/var/cache/a.js", b"compiled").unwrap();

        assert_eq!(store.read("/var/cache/a.js").unwrap(), b"compiled");
        assert_eq!(store.modified("/var/cache/a.js").unwrap(), Some(modified));
        assert_eq!(store.modified("/var/cache/none.js").unwrap(), None);
        assert_eq!(store.modified("/var/cache").unwrap(), None);
        assert!(matches!(store.read("/nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_list_groups_reads_group_file() {
        let (_dir, store) = open();
        let record = GroupRecord::new("site", "/apps/site")
            .with_cache_path("/apps/site/out")
            .with_option("less", "compress", "true");
        write_group_file(&store, &record).unwrap();

        let groups = store.list_groups().unwrap();
        assert_eq!(groups, vec![record.clone()]);
        assert_eq!(store.group("/apps/site").unwrap(), Some(record));
        assert_eq!(store.group("/apps").unwrap(), None);
    }

    #[test]
    fn test_malformed_group_file() {
        let (_dir, store) = open();
        store.write("/apps/bad/group.toml", b"name = 3").unwrap();
        assert!(matches!(
            store.group("/apps/bad"),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_list_groups_skips_malformed_group() {
        let (_dir, store) = open();
        let good = GroupRecord::new("good", "/apps/good");
        write_group_file(&store, &good).unwrap();
        store.write("/apps/bad/group.toml", b"name = 3").unwrap();

        assert_eq!(store.list_groups().unwrap(), vec![good]);
    }

    #[test]
    fn test_observe_delivers_write() {
        let (_dir, store) = open();
        store.write("/apps/seed.js", b"S").unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        let _observation = store.observe("/apps", tx).unwrap();

        store.write("/apps/a.js", b"A").unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut seen = false;
        while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(event) if event.path == "/apps/a.js" => {
                    seen = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(seen, "no event for /apps/a.js");
    }

    #[test]
    fn test_list_sources_order_and_exclusions() {
        let (_dir, store) = open();
        let record = GroupRecord::new("site", "/apps/site").with_cache_path("/apps/site/out");
        write_group_file(&store, &record).unwrap();
        store.write("/apps/site/b.js", b"B").unwrap();
        store.write("/apps/site/a.js", b"A").unwrap();
        store.write("/apps/site/lib/c.less", b"C").unwrap();
        store.write("/apps/site/out/a.js", b"compiled").unwrap();
        store.write("/apps/site/.hidden.js", b"H").unwrap();
        write_group_file(&store, &GroupRecord::new("nested", "/apps/site/nested")).unwrap();
        store.write("/apps/site/nested/n.js", b"N").unwrap();

        let members = store.list_sources(&record).unwrap();
        assert_eq!(
            members,
            vec!["/apps/site/a.js", "/apps/site/b.js", "/apps/site/lib/c.less"]
        );
    }

    #[test]
    fn test_group_hash_persists() {
        let (_dir, store) = open();
        write_group_file(&store, &GroupRecord::new("site", "/apps/site")).unwrap();
        let hash = ContentHash::new([3; 32]);

        store.set_group_hash("/apps/site", Some(&hash)).unwrap();
        assert_eq!(store.group("/apps/site").unwrap().unwrap().hash, Some(hash));

        store.set_group_hash("/apps/site", None).unwrap();
        assert_eq!(store.group("/apps/site").unwrap().unwrap().hash, None);

        assert!(matches!(
            store.set_group_hash("/apps/none", None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_inventory_summary_persists() {
        let (_dir, store) = open();
        write_group_file(&store, &GroupRecord::new("site", "/apps/site")).unwrap();
        let mut summary = InventorySummary::default();
        summary
            .artifacts
            .insert("js".into(), vec!["/var/webresource/groups/a.js".into()]);
        summary
            .consolidated
            .insert("js".into(), "/var/webresource/groups/site.js".into());

        store.write_inventory("/apps/site", &summary).unwrap();
        assert_eq!(store.inventory("/apps/site").unwrap(), Some(summary));
    }

    #[test]
    fn test_store_path_mapping() {
        let (_dir, store) = open();
        let host = store.host_path("/apps/site/a.js");
        assert_eq!(store.store_path(&host).as_deref(), Some("/apps/site/a.js"));
        assert_eq!(store.store_path(store.root()).as_deref(), Some("/"));
        assert_eq!(store.store_path(Path::new("/definitely/elsewhere")), None);
    }

    #[test]
    fn test_translate_group_lifecycle() {
        let (_dir, store) = open();
        write_group_file(&store, &GroupRecord::new("site", "/apps/site")).unwrap();
        let marker = store.host_path("/apps/site/group.toml");

        let added = translate(
            store.root(),
            &make_event(vec![marker.clone()], EventKind::Create(CreateKind::File)),
        );
        assert_eq!(added, vec![StoreEvent::new("/apps/site", StoreEventKind::GroupAdded)]);

        fs::remove_file(&marker).unwrap();
        let removed = translate(
            store.root(),
            &make_event(vec![marker], EventKind::Remove(RemoveKind::File)),
        );
        assert_eq!(
            removed,
            vec![StoreEvent::new("/apps/site", StoreEventKind::GroupRemoved)]
        );
    }

    #[test]
    fn test_translate_sidecars_and_hidden() {
        let (_dir, store) = open();
        write_group_file(&store, &GroupRecord::new("site", "/apps/site")).unwrap();
        store.set_group_hash("/apps/site", None).unwrap();
        store
            .write_inventory("/apps/site", &InventorySummary::default())
            .unwrap();
        store.write("/apps/site/.swap", b"").unwrap();
        store.write("/apps/site/a.js", b"A").unwrap();

        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Any));
        let events = translate(
            store.root(),
            &make_event(
                vec![
                    store.host_path("/apps/site/.state.json"),
                    store.host_path("/apps/site/.inventory.json"),
                    store.host_path("/apps/site/.swap"),
                    store.host_path("/apps/site/a.js"),
                    store.host_path("/apps/site"),
                ],
                modify,
            ),
        );
        assert_eq!(
            events,
            vec![
                StoreEvent::new(
                    "/apps/site",
                    StoreEventKind::PropertyChanged(GROUP_HASH_PROPERTY)
                ),
                StoreEvent::new("/apps/site/inventory", StoreEventKind::Changed),
                StoreEvent::new("/apps/site/a.js", StoreEventKind::Changed),
            ]
        );
    }

    #[test]
    fn test_translate_rename_into_place() {
        use notify::event::RenameMode;

        let (_dir, store) = open();
        write_group_file(&store, &GroupRecord::new("site", "/apps/site")).unwrap();
        let events = translate(
            store.root(),
            &make_event(
                vec![
                    store.host_path("/apps/site/.group.toml.0.tmp"),
                    store.host_path("/apps/site/group.toml"),
                ],
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            ),
        );
        assert_eq!(
            events,
            vec![StoreEvent::new("/apps/site", StoreEventKind::GroupAdded)]
        );
    }

    #[test]
    fn test_translate_ignores_access() {
        let (_dir, store) = open();
        store.write("/a.js", b"A").unwrap();
        let event = make_event(
            vec![store.host_path("/a.js")],
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
        );
        assert!(translate(store.root(), &event).is_empty());
    }
}
