//! Per-operation group snapshot.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::freshness::ContentHash;
use crate::store::{ContentStore, GroupRecord, OptionsByCompiler};

/// A group as seen by one sweep or compile pass.
///
/// Built fresh from the store for every operation and never mutated while
/// shared; membership changes show up in the next snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub path: String,
    pub cache_path: Option<String>,
    pub compile_options: OptionsByCompiler,
    pub hash: Option<ContentHash>,
    /// Source paths in inventory order.
    pub members: Vec<String>,
}

impl Group {
    /// Snapshot a group record together with its current members.
    pub fn load(store: &dyn ContentStore, record: GroupRecord) -> Result<Self, StoreError> {
        let members = store.list_sources(&record)?;
        Ok(Self::from_record(record, members))
    }

    pub fn from_record(record: GroupRecord, members: Vec<String>) -> Self {
        Self {
            name: record.name,
            path: record.path,
            cache_path: record.cache_path,
            compile_options: record.compile_options,
            hash: record.hash,
            members,
        }
    }

    /// Options configured for one compiler.
    pub fn options_for(&self, compiler: &str) -> Option<&BTreeMap<String, String>> {
        self.compile_options.get(compiler)
    }
}
