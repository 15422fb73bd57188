//! Post-processing hooks.
//!
//! Processors run in registration order. Each one decides per input whether
//! it applies, then transforms the bytes.
//!
//! | Hook                       | Input                     | Runs after      |
//! |----------------------------|---------------------------|-----------------|
//! | `PostCompileProcess`       | source of the artifact    | every compile   |
//! | `PostConsolidationProcess` | consolidated artifact path| consolidation   |

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::SourceDescriptor;

pub trait PostCompileProcess: Send + Sync {
    fn should_process(&self, source: &SourceDescriptor) -> bool;
    fn process(&self, compiled: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

pub trait PostConsolidationProcess: Send + Sync {
    fn should_process(&self, consolidated_path: &str) -> bool;
    fn process(&self, consolidated: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// Registered processors for both hooks.
#[derive(Default)]
pub struct Processors {
    post_compile: ArcSwap<Vec<Arc<dyn PostCompileProcess>>>,
    post_consolidation: ArcSwap<Vec<Arc<dyn PostConsolidationProcess>>>,
}

impl Processors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post_compile(&self, processor: Arc<dyn PostCompileProcess>) {
        self.post_compile.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            next.push(Arc::clone(&processor));
            next
        });
    }

    pub fn add_post_consolidation(&self, processor: Arc<dyn PostConsolidationProcess>) {
        self.post_consolidation.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            next.push(Arc::clone(&processor));
            next
        });
    }

    pub fn post_compile(
        &self,
        source: &SourceDescriptor,
        mut bytes: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>> {
        for processor in self.post_compile.load().iter() {
            if processor.should_process(source) {
                bytes = processor.process(bytes)?;
            }
        }
        Ok(bytes)
    }

    pub fn post_consolidation(&self, path: &str, mut bytes: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        for processor in self.post_consolidation.load().iter() {
            if processor.should_process(path) {
                bytes = processor.process(bytes)?;
            }
        }
        Ok(bytes)
    }
}
