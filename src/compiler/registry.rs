//! Ordered compiler registry.
//!
//! Uses `arc-swap` so selection never blocks on registration: readers take a
//! snapshot of the compiler list, writers replace it atomically.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::{Compiler, PassthroughCompiler, SourceDescriptor};
use crate::error::CacheError;

/// Compilers in registration order.
pub struct CompilerRegistry {
    compilers: ArcSwap<Vec<Arc<dyn Compiler>>>,
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self {
            compilers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Registry preloaded with the passthrough script and stylesheet compilers.
    pub fn with_passthrough() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PassthroughCompiler::javascript()));
        registry.register(Arc::new(PassthroughCompiler::stylesheet()));
        registry
    }

    /// Append a compiler. A compiler with the same name is replaced in place.
    pub fn register(&self, compiler: Arc<dyn Compiler>) {
        self.compilers.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            match next.iter().position(|c| c.name() == compiler.name()) {
                Some(i) => next[i] = Arc::clone(&compiler),
                None => next.push(Arc::clone(&compiler)),
            }
            next
        });
        crate::debug!("compile"; "registered compiler `{}`", compiler.name());
    }

    /// Remove a compiler by name. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let previous = self.compilers.rcu(|current| {
            current
                .iter()
                .filter(|c| c.name() != name)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|c| c.name() == name)
    }

    /// First compiler, in registration order, that accepts the source.
    pub fn select(&self, source: &SourceDescriptor) -> Result<Arc<dyn Compiler>, CacheError> {
        self.compilers
            .load()
            .iter()
            .find(|c| c.accepts(source))
            .cloned()
            .ok_or_else(|| CacheError::CompilerNotFound(source.path().to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.compilers
            .load()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.compilers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileOptions;

    /// Accepts everything, output tagged with its name.
    struct Catchall(&'static str);

    impl Compiler for Catchall {
        fn name(&self) -> &str {
            self.0
        }
        fn output_extension(&self) -> &str {
            "js"
        }
        fn accepts(&self, _: &SourceDescriptor) -> bool {
            true
        }
        fn cache_root(&self) -> &str {
            "/var/cache"
        }
        fn compile(&self, _: &[u8], _: &CompileOptions) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_select_first_match_in_registration_order() {
        let registry = CompilerRegistry::with_passthrough();
        registry.register(Arc::new(Catchall("first")));
        registry.register(Arc::new(Catchall("second")));

        // passthrough registered earlier wins for .js
        let js = registry.select(&SourceDescriptor::new("/a.js")).unwrap();
        assert_eq!(js.name(), "noop-js");

        let coffee = registry.select(&SourceDescriptor::new("/a.coffee")).unwrap();
        assert_eq!(coffee.name(), "first");
    }

    #[test]
    fn test_select_not_found() {
        let registry = CompilerRegistry::with_passthrough();
        let err = registry
            .select(&SourceDescriptor::new("/a.coffee"))
            .err()
            .unwrap();
        assert!(err.is_compiler_not_found());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = CompilerRegistry::new();
        registry.register(Arc::new(Catchall("a")));
        registry.register(Arc::new(Catchall("b")));
        registry.register(Arc::new(Catchall("a")));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_unregister() {
        let registry = CompilerRegistry::with_passthrough();
        assert!(registry.unregister("noop-js"));
        assert!(!registry.unregister("noop-js"));
        assert_eq!(registry.names(), vec!["noop-css"]);
        assert!(registry.select(&SourceDescriptor::new("/a.js")).is_err());
    }
}
