//! webresource - compile-and-cache layer for script and stylesheet sources.
//!
//! Sources live in a hierarchical, path-addressed content store. Pluggable
//! compilers turn them into browser-ready artifacts that are cached next to
//! the store content and recompiled only when their source is newer. Named
//! groups of sources can be compiled together and consolidated into one
//! output per extension, and a background sweep keeps every group current.
//!
//! # Module Structure
//!
//! ```text
//! src/
//! ├── store/       # ContentStore trait, MemoryStore, FsStore
//! ├── compiler/    # Compiler trait, registry, pass-through, post-processors
//! ├── cache/       # CompileCache, path locks, consolidation
//! ├── actor/       # Invalidation sweep, compile workers, group lifecycle
//! ├── config/      # webresource.toml
//! ├── freshness/   # mtime comparison, group fingerprints
//! ├── path.rs      # Store path helpers, cache path resolution
//! ├── group.rs     # Group snapshot
//! ├── inventory.rs # Group name index
//! ├── bus.rs       # Topic event bus
//! ├── error.rs     # StoreError, CacheError
//! └── logger.rs    # log! / debug!
//! ```

pub mod actor;
pub mod bus;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod freshness;
pub mod group;
pub mod inventory;
pub mod logger;
pub mod path;
pub mod store;

#[cfg(test)]
mod testing;

pub use actor::Service;
pub use cache::CompileCache;
pub use compiler::{Compiler, CompilerRegistry};
pub use config::EngineConfig;
pub use error::{CacheError, StoreError};
pub use store::{ContentStore, FsStore, MemoryStore};
