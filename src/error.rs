//! Error types for the store and the compile cache.

use thiserror::Error;

// ============================================================================
// StoreError
// ============================================================================

/// Content store access failures.
///
/// A sweep or background batch that hits one of these aborts the current
/// iteration; the next trigger starts again from scratch.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no node at `{0}`")]
    NotFound(String),

    #[error("IO error at `{path}`")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data at `{path}`: {reason}")]
    Malformed { path: String, reason: String },

    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// CacheError
// ============================================================================

/// Errors surfaced by the compile cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No registered compiler accepts the source.
    #[error("no compiler found for `{0}`")]
    CompilerNotFound(String),

    /// Transformation or artifact persistence failed.
    #[error("failed to compile `{path}`")]
    Compile {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown web resource group `{0}`")]
    UnknownGroup(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    pub fn compile(path: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Compile {
            path: path.into(),
            source: source.into(),
        }
    }

    pub const fn is_compiler_not_found(&self) -> bool {
        matches!(self, Self::CompilerNotFound(_))
    }

    /// Render the error as a block comment, for callers that degrade to a
    /// placeholder instead of failing the whole render.
    pub fn placeholder(&self) -> String {
        let mut chain = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            chain.push_str(": ");
            chain.push_str(&err.to_string());
            source = err.source();
        }
        format!("/* {} */", chain.replace("*/", "* /"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_store_error_display() {
        let err = StoreError::io("/apps/site/a.js", Error::new(ErrorKind::NotFound, "gone"));
        let display = err.to_string();
        assert!(display.contains("IO error"));
        assert!(display.contains("/apps/site/a.js"));

        let err = StoreError::malformed("/apps/site/group.toml", "missing name");
        assert!(err.to_string().contains("missing name"));
    }

    #[test]
    fn test_compiler_not_found() {
        let err = CacheError::CompilerNotFound("/apps/a.ts".into());
        assert!(err.is_compiler_not_found());
        assert!(err.to_string().contains("/apps/a.ts"));
        assert!(!CacheError::UnknownGroup("g".into()).is_compiler_not_found());
    }

    #[test]
    fn test_placeholder_contains_chain() {
        let err = CacheError::compile("/apps/a.coffee", anyhow::anyhow!("unexpected token"));
        let comment = err.placeholder();
        assert!(comment.starts_with("/* "));
        assert!(comment.ends_with(" */"));
        assert!(comment.contains("/apps/a.coffee"));
        assert!(comment.contains("unexpected token"));
    }

    #[test]
    fn test_placeholder_escapes_comment_end() {
        let err = CacheError::compile("/a.js", anyhow::anyhow!("bad */ token"));
        let comment = err.placeholder();
        assert_eq!(comment.matches("*/").count(), 1);
    }
}
