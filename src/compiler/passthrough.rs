//! No-op compilers for content that needs no transformation.
//!
//! Plain `.js` and `.css` sources still go through the cache so grouping and
//! consolidation treat every file type the same way.

use super::{CompileOptions, Compiler, SourceDescriptor};

/// Copies its input unchanged; accepts sources already in its output format.
#[derive(Debug, Clone)]
pub struct PassthroughCompiler {
    name: String,
    extension: String,
}

impl PassthroughCompiler {
    pub fn new(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
        }
    }

    pub fn javascript() -> Self {
        Self::new("noop-js", "js")
    }

    pub fn stylesheet() -> Self {
        Self::new("noop-css", "css")
    }
}

impl Compiler for PassthroughCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_extension(&self) -> &str {
        &self.extension
    }

    fn accepts(&self, source: &SourceDescriptor) -> bool {
        source.extension() == Some(self.extension.as_str())
    }

    /// Ungrouped artifacts resolve onto the source itself.
    fn cache_root(&self) -> &str {
        "/"
    }

    fn compile(&self, source: &[u8], _options: &CompileOptions) -> anyhow::Result<Vec<u8>> {
        Ok(source.to_vec())
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}
