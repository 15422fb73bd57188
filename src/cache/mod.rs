//! Compile cache engine.
//!
//! Turns sources into artifacts at resolved cache paths, reusing an artifact
//! for as long as it is not older than its source.
//!
//! # Module Structure
//!
//! - `lock` - Per-path reentrant lock table
//! - `consolidate` - Ordered concatenation of a group's artifacts
//!
//! # Single flight
//!
//! ```text
//! select compiler ─► resolve path ─► lock(path) ─► fresh? ── yes ─► reuse
//!                                                   │
//!                                                   no ─► compile ─► post-process ─► write
//! ```
//!
//! The freshness check and the write happen under the same path lock, so at
//! most one compile is in flight per cache path. Callers that queued behind
//! it find the fresh artifact and return without compiling.

mod consolidate;
mod lock;

pub use lock::{PathGuard, PathLockTable};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use rayon::prelude::*;

use crate::compiler::{CompileOptions, CompilerRegistry, Processors, SourceDescriptor};
use crate::error::{CacheError, StoreError};
use crate::freshness::is_fresh;
use crate::group::Group;
use crate::inventory::InventoryIndex;
use crate::path::{PathResolver, extension};
use crate::store::{ContentStore, InventorySummary};
use crate::{debug, log};

/// A compiled artifact in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: String,
    pub modified: SystemTime,
    /// Whether this call produced the artifact (as opposed to reusing it).
    pub compiled: bool,
}

/// Result of compiling every member of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOutput {
    /// Output extension → member artifact paths, in inventory order.
    pub artifacts: BTreeMap<String, Vec<String>>,
    /// Output extension → consolidated artifact, when consolidation ran.
    pub consolidated: BTreeMap<String, String>,
    /// Members no compiler accepted.
    pub skipped: Vec<String>,
}

impl GroupOutput {
    /// Extension → paths: the consolidated artifact alone when consolidated,
    /// the member artifacts otherwise.
    pub fn paths(&self) -> BTreeMap<String, Vec<String>> {
        if self.consolidated.is_empty() {
            return self.artifacts.clone();
        }
        self.consolidated
            .iter()
            .map(|(ext, path)| (ext.clone(), vec![path.clone()]))
            .collect()
    }

    pub fn summary(&self) -> InventorySummary {
        InventorySummary {
            artifacts: self.artifacts.clone(),
            consolidated: self.consolidated.clone(),
        }
    }
}

/// The compile cache engine.
pub struct CompileCache {
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
    processors: Arc<Processors>,
    inventory: Arc<InventoryIndex>,
    resolver: PathResolver,
    locks: PathLockTable,
}

impl CompileCache {
    pub fn new(
        store: Arc<dyn ContentStore>,
        registry: Arc<CompilerRegistry>,
        inventory: Arc<InventoryIndex>,
        group_root: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            processors: Arc::new(Processors::new()),
            inventory,
            resolver: PathResolver::new(group_root),
            locks: PathLockTable::new(),
        }
    }

    pub fn with_processors(mut self, processors: Arc<Processors>) -> Self {
        self.processors = processors;
        self
    }

    pub fn registry(&self) -> &Arc<CompilerRegistry> {
        &self.registry
    }

    pub fn processors(&self) -> &Arc<Processors> {
        &self.processors
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn locks(&self) -> &PathLockTable {
        &self.locks
    }

    // =========================================================================
    // Single artifacts
    // =========================================================================

    /// Fresh artifact for `source`, compiling it if needed.
    pub fn artifact(&self, source: &str, group: Option<&Group>) -> Result<ArtifactRef, CacheError> {
        let descriptor = SourceDescriptor::new(source);
        let compiler = self.registry.select(&descriptor)?;
        let target = self.resolver.resolve(source, group, compiler.as_ref());

        let _guard = self.locks.acquire(&target);

        let source_modified = self
            .store
            .modified(source)?
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        if let Some(modified) = self.store.modified(&target)?
            && is_fresh(Some(modified), source_modified)
        {
            debug!("cache"; "fresh: {}", target);
            return Ok(ArtifactRef {
                path: target,
                modified,
                compiled: false,
            });
        }

        let bytes = self.store.read(source)?;
        let options = CompileOptions::for_source(
            source,
            group.and_then(|g| g.options_for(compiler.name())),
        );
        let output = compiler
            .compile(&bytes, &options)
            .and_then(|compiled| self.processors.post_compile(&descriptor, compiled))
            .map_err(|e| CacheError::compile(source, e))?;
        let modified = self.store.write(&target, &output).map_err(|e| {
            CacheError::compile(
                source,
                anyhow::Error::new(e).context(format!("failed to write `{target}`")),
            )
        })?;

        debug!("compile"; "{} -> {} ({})", source, target, compiler.name());
        Ok(ArtifactRef {
            path: target,
            modified,
            compiled: true,
        })
    }

    /// Path of the fresh ungrouped artifact for `source`.
    pub fn compiled_path(&self, source: &str) -> Result<String, CacheError> {
        self.artifact(source, None).map(|artifact| artifact.path)
    }

    /// Bytes of the fresh ungrouped artifact for `source`.
    pub fn compiled_bytes(&self, source: &str) -> Result<Vec<u8>, CacheError> {
        let artifact = self.artifact(source, None)?;
        Ok(self.store.read(&artifact.path)?)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Compile every member of a group, then consolidate per extension if asked.
    ///
    /// Members are compiled in parallel; results keep inventory order. A member
    /// no compiler accepts is logged and skipped. Any other failure fails the
    /// group, leaving artifacts already written in place.
    pub fn compile_group(
        &self,
        group: &Group,
        consolidate: bool,
    ) -> Result<GroupOutput, CacheError> {
        let results: Vec<_> = group
            .members
            .par_iter()
            .map(|source| (source, self.artifact(source, Some(group))))
            .collect();

        let mut output = GroupOutput::default();
        for (source, result) in results {
            match result {
                Ok(artifact) => {
                    let ext = extension(&artifact.path).unwrap_or_default().to_string();
                    output.artifacts.entry(ext).or_default().push(artifact.path);
                }
                Err(e) if e.is_compiler_not_found() => {
                    log!("cache"; "{}: {}, skipped", group.name, e);
                    output.skipped.push(source.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if consolidate {
            for (ext, members) in &output.artifacts {
                let path = self.consolidate(group, ext, members)?;
                output.consolidated.insert(ext.clone(), path);
            }
        }

        Ok(output)
    }

    /// Extension → artifact paths for the named group.
    pub fn group_paths(
        &self,
        name: &str,
        consolidate: bool,
    ) -> Result<BTreeMap<String, Vec<String>>, CacheError> {
        let group = self.inventory.load_group(name)?;
        Ok(self.compile_group(&group, consolidate)?.paths())
    }

    /// Extension → consolidated bytes for the named group.
    pub fn compiled_group(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>, CacheError> {
        let group = self.inventory.load_group(name)?;
        let output = self.compile_group(&group, true)?;
        output
            .consolidated
            .into_iter()
            .map(|(ext, path)| -> Result<_, CacheError> { Ok((ext, self.store.read(&path)?)) })
            .collect()
    }
}
