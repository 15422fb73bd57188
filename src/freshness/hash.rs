//! Group fingerprints using blake3.
//!
//! A fingerprint summarizes everything that decides a group's compiled
//! output: its identity, cache location, compile options, and for every
//! member (in inventory order) its path and modification time. The sweep
//! compares it against the hash stored on the group node.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::group::Group;
use crate::store::ContentStore;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (stored on group nodes).
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display first 16 chars of hex for brevity
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Marker hashed in place of a timestamp when a member has vanished.
const MISSING_MEMBER: &[u8] = b"\0missing";

/// Compute the fingerprint of a group's current inventory.
///
/// Every field is length-prefixed so adjacent values cannot run together.
pub fn fingerprint(store: &dyn ContentStore, group: &Group) -> Result<ContentHash, StoreError> {
    let mut hasher = blake3::Hasher::new();
    update_str(&mut hasher, &group.name);
    update_str(&mut hasher, group.cache_path.as_deref().unwrap_or(""));

    // BTreeMap iteration keeps options in sorted order
    hasher.update(&(group.compile_options.len() as u64).to_le_bytes());
    for (compiler, options) in &group.compile_options {
        update_str(&mut hasher, compiler);
        hasher.update(&(options.len() as u64).to_le_bytes());
        for (key, value) in options {
            update_str(&mut hasher, key);
            update_str(&mut hasher, value);
        }
    }

    hasher.update(&(group.members.len() as u64).to_le_bytes());
    for member in &group.members {
        update_str(&mut hasher, member);
        match store.modified(member)? {
            Some(modified) => {
                hasher.update(&timestamp_nanos(modified).to_le_bytes());
            }
            None => {
                hasher.update(MISSING_MEMBER);
            }
        }
    }

    Ok(ContentHash::new(*hasher.finalize().as_bytes()))
}

fn update_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn timestamp_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(before) => -(before.duration().as_nanos() as i128),
    }
}
