//! `[cache]`, `[scheduler]` and `[store]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [cache]
//! group_root = "/var/webresource/groups"   # Default root for group artifacts
//!
//! [scheduler]
//! period_secs = 600    # Invalidation sweep period
//! workers = 4          # Groups compiled concurrently
//! watch = true         # Subscribe to each group's subtree
//!
//! [store]
//! root = "content"     # Directory backing the filesystem store
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache root used for groups without a `cache_path` override.
pub const DEFAULT_GROUP_ROOT: &str = "/var/webresource/groups";

/// Cache path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store path under which group artifacts and consolidated outputs live
    /// when the group has no override.
    pub group_root: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group_root: DEFAULT_GROUP_ROOT.to_string(),
        }
    }
}

impl CacheConfig {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        if !self.group_root.starts_with('/') {
            problems.push(format!(
                "cache.group_root must be an absolute store path, got `{}`",
                self.group_root
            ));
        }
    }
}

/// Invalidation sweep and background compile settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between two timer-driven sweeps.
    pub period_secs: u64,

    /// Size of the background compile worker pool.
    ///
    /// Bounds how many groups compile at once. Members within a group are
    /// compiled on rayon's global pool, which every worker shares.
    pub workers: usize,

    /// Register a content subscription per group for incremental sweeps.
    pub watch: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_secs: 600,
            workers: 4,
            watch: true,
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        if self.period_secs == 0 {
            problems.push("scheduler.period_secs must be greater than 0".into());
        }
        if self.workers == 0 {
            problems.push("scheduler.workers must be at least 1".into());
        }
    }
}

/// Filesystem store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory mapped to the store root `/`.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("content"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;
    use std::time::Duration;

    #[test]
    fn test_scheduler_config() {
        let config = test_parse_config("[scheduler]\nperiod_secs = 30\nworkers = 8\nwatch = false");
        assert_eq!(config.scheduler.period(), Duration::from_secs(30));
        assert_eq!(config.scheduler.workers, 8);
        assert!(!config.scheduler.watch);
    }

    #[test]
    fn test_scheduler_partial_override() {
        let config = test_parse_config("[scheduler]\nworkers = 2");
        assert_eq!(config.scheduler.workers, 2);
        // period uses default
        assert_eq!(config.scheduler.period_secs, 600);
    }

    #[test]
    fn test_cache_config() {
        let config = test_parse_config("[cache]\ngroup_root = \"/var/cache/groups\"");
        assert_eq!(config.cache.group_root, "/var/cache/groups");
    }
}
