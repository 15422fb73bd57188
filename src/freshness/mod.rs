//! Freshness detection: mtime for compiled artifacts, blake3 fingerprint for groups.

mod hash;
pub mod mtime;

pub use hash::{ContentHash, fingerprint};
pub use mtime::is_fresh;
