//! Compiler plugins and selection.
//!
//! # Module Structure
//!
//! - `registry` - Ordered compiler registry, first match wins
//! - `passthrough` - No-op compilers for plain scripts and stylesheets
//! - `process` - Post-compile and post-consolidation processors

mod passthrough;
mod process;
mod registry;

pub use passthrough::PassthroughCompiler;
pub use process::{PostCompileProcess, PostConsolidationProcess, Processors};
pub use registry::CompilerRegistry;

use std::collections::BTreeMap;

/// Option every compiler receives: the store path of the source being compiled.
pub const SOURCE_PATH_OPTION: &str = "source_path";

// ============================================================================
// SourceDescriptor
// ============================================================================

/// What a compiler gets to inspect when deciding whether it accepts a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    path: String,
}

impl SourceDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Source extension, without the dot.
    pub fn extension(&self) -> Option<&str> {
        crate::path::extension(&self.path)
    }
}

// ============================================================================
// CompileOptions
// ============================================================================

/// Options handed to a compiler invocation.
///
/// The group's options for the selected compiler, overlaid with the global
/// set (currently only the source path).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions(BTreeMap<String, String>);

impl CompileOptions {
    pub fn for_source(source: &str, group_options: Option<&BTreeMap<String, String>>) -> Self {
        let mut options = group_options.cloned().unwrap_or_default();
        options.insert(SOURCE_PATH_OPTION.to_string(), source.to_string());
        Self(options)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn source_path(&self) -> &str {
        self.get(SOURCE_PATH_OPTION).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// A source transformer plugged into the cache.
///
/// Implementations must be cheap to query; `compile` may be slow and is
/// always called with the target's path lock held.
pub trait Compiler: Send + Sync {
    /// Unique name, also the key for group compile options.
    fn name(&self) -> &str;

    /// Extension of the compiled output, without the dot.
    fn output_extension(&self) -> &str;

    fn accepts(&self, source: &SourceDescriptor) -> bool;

    /// Root for artifacts compiled outside any group.
    fn cache_root(&self) -> &str;

    fn compile(&self, source: &[u8], options: &CompileOptions) -> anyhow::Result<Vec<u8>>;

    /// Output equals input. Registering such a compiler never invalidates
    /// existing artifacts.
    fn is_passthrough(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_extension() {
        assert_eq!(SourceDescriptor::new("/a/b.coffee").extension(), Some("coffee"));
        assert_eq!(SourceDescriptor::new("/a/README").extension(), None);
    }

    #[test]
    fn test_global_options_override_group_options() {
        let mut group = BTreeMap::new();
        group.insert("compress".to_string(), "true".to_string());
        group.insert(SOURCE_PATH_OPTION.to_string(), "/bogus".to_string());

        let options = CompileOptions::for_source("/apps/a.less", Some(&group));
        assert_eq!(options.source_path(), "/apps/a.less");
        assert_eq!(options.get("compress"), Some("true"));
        assert_eq!(options.iter().count(), 2);

        let bare = CompileOptions::for_source("/apps/b.less", None);
        assert_eq!(bare.iter().count(), 1);
    }
}
