//! Engine configuration management for `webresource.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section.rs     # [cache], [scheduler], [store]
//! ├── error.rs       # ConfigError
//! └── mod.rs         # EngineConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section       | Purpose                                          |
//! |---------------|--------------------------------------------------|
//! | `[cache]`     | Default cache root for group artifacts           |
//! | `[scheduler]` | Sweep period, worker pool size, subtree watches  |
//! | `[store]`     | Directory backing the filesystem content store   |

mod error;
mod section;

pub use error::ConfigError;
pub use section::{CacheConfig, DEFAULT_GROUP_ROOT, SchedulerConfig, StoreConfig};

use crate::log;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default config file name, searched upward from the working directory.
pub const CONFIG_FILE: &str = "webresource.toml";

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing webresource.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Directory containing the config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Cache path settings
    pub cache: CacheConfig,

    /// Invalidation sweep and background compile settings
    pub scheduler: SchedulerConfig,

    /// Filesystem store settings
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load configuration from a file path.
    ///
    /// A missing file yields the defaults rooted at the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_path(path)?
        } else {
            log!("config"; "{} not found, using defaults", path.display());
            Self::default()
        };

        config.config_path = path.to_path_buf();
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.normalize_paths();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;

        if !ignored.is_empty() {
            let display_path = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_else(|| path.to_string_lossy());
            log!("warning"; "unknown fields in {}, ignoring:", display_path);
            for field in &ignored {
                eprintln!("- {}", field);
            }
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Resolve the store root: `~` expansion, then relative to the config directory.
    fn normalize_paths(&mut self) {
        let raw = self.store.root.to_string_lossy();
        let expanded = PathBuf::from(shellexpand::tilde(&raw).into_owned());
        self.store.root = if expanded.is_relative() {
            self.root.join(expanded)
        } else {
            expanded
        };
    }

    /// Validate configuration, collecting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        self.cache.validate(&mut problems);
        self.scheduler.validate(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}

/// Find config file by searching upward from the current directory.
pub fn find_config_file(config_name: &Path) -> Option<PathBuf> {
    if config_name.is_absolute() {
        return Some(config_name.to_path_buf());
    }

    let cwd = std::env::current_dir().ok()?;
    let mut current = cwd.as_path();
    loop {
        let candidate = current.join(config_name);
        if candidate.exists() {
            return Some(candidate);
        }
        current = current.parent()?;
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config, panicking on unknown fields (to catch typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> EngineConfig {
    let (parsed, ignored) = EngineConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_str_invalid_toml() {
        let result = EngineConfig::from_str("[cache\ngroup_root = \"/x\"");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.cache.group_root, DEFAULT_GROUP_ROOT);
        assert_eq!(config.scheduler.period_secs, 600);
        assert_eq!(config.scheduler.workers, 4);
        assert!(config.scheduler.watch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_detected() {
        let content = "[scheduler]\nworkers = 2\n[unknown_section]\nfield = \"value\"";
        let (config, ignored) = EngineConfig::parse_with_ignored(content).unwrap();

        assert_eq!(config.scheduler.workers, 2);
        assert!(ignored.iter().any(|f| f.contains("unknown_section")));
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let config = test_parse_config(
            "[cache]\ngroup_root = \"relative\"\n[scheduler]\nworkers = 0\nperiod_secs = 0",
        );
        let Err(ConfigError::Validation(problems)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_load_resolves_store_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[store]\nroot = \"content\"\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.store.root, dir.path().join("content"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.store.root, dir.path().join("content"));
    }

    #[test]
    fn test_find_config_file_absolute() {
        let path = Path::new("/etc/webresource.toml");
        assert_eq!(find_config_file(path), Some(path.to_path_buf()));
    }
}
