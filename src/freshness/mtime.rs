//! Mtime-based freshness detection for compiled artifacts.
//!
//! Both timestamps come from the content store: the source's is set by
//! whoever edits it, the artifact's is set when the engine writes it.
//! Source mutation always advances the timestamp, so comparing the two is
//! enough and no content has to be read.

use std::time::SystemTime;

/// Check if an artifact is fresh relative to its source.
///
/// Returns `true` if the artifact exists and its timestamp is not earlier
/// than the source's. Equal timestamps count as fresh, which also covers
/// passthrough artifacts resolved onto their own source path.
pub fn is_fresh(artifact: Option<SystemTime>, source: SystemTime) -> bool {
    artifact.is_some_and(|artifact| artifact >= source)
}
