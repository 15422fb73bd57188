//! Actor Message Definitions
//!
//! Messages passed between the bus handlers, the sweep thread and the
//! compile workers.
//!
//! ```text
//! store notification --group path--> sweep thread --COMPILE--> dispatcher --Job--> workers
//! ```

use rustc_hash::FxHashSet;

// =============================================================================
// Scheduler Messages
// =============================================================================

/// Which groups a sweep looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepFilter {
    /// Every group in the store (timer tick, startup)
    All,
    /// Only the groups at these paths (content-change notifications).
    /// Paths survive a group rename, names do not.
    Only(FxHashSet<String>),
}

impl SweepFilter {
    pub fn group(path: impl Into<String>) -> Self {
        let mut paths = FxHashSet::default();
        paths.insert(path.into());
        Self::Only(paths)
    }

    pub fn includes(&self, group_path: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(paths) => paths.contains(group_path),
        }
    }
}

// =============================================================================
// Dispatcher Messages
// =============================================================================

/// Work item for a compile worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Compile one group by path
    Group(String),
    /// Compile every group known when the job is picked up
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_filter() {
        assert!(SweepFilter::All.includes("/anything"));
        let only = SweepFilter::group("/apps/site");
        assert!(only.includes("/apps/site"));
        assert!(!only.includes("/apps/other"));
    }
}
