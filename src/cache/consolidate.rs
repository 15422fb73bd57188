//! Consolidation of a group's artifacts into one output per extension.

use super::CompileCache;
use crate::debug;
use crate::error::CacheError;
use crate::group::Group;

impl CompileCache {
    /// Concatenate `members` in the given order into `<cache root>/<name>.<ext>`.
    ///
    /// Always rewrites the target; callers only consolidate after every member
    /// has been resolved to a fresh artifact.
    pub fn consolidate(
        &self,
        group: &Group,
        ext: &str,
        members: &[String],
    ) -> Result<String, CacheError> {
        let target = self.resolver.consolidated(group, ext);
        let _guard = self.locks.acquire(&target);

        let mut bytes = Vec::new();
        for member in members {
            bytes.extend(self.store.read(member)?);
        }

        let bytes = self
            .processors
            .post_consolidation(&target, bytes)
            .map_err(|e| CacheError::compile(&target, e))?;
        self.store.write(&target, &bytes).map_err(|e| {
            CacheError::compile(
                &target,
                anyhow::Error::new(e).context(format!("failed to write `{target}`")),
            )
        })?;

        debug!("cache"; "consolidated {} members into {}", members.len(), target);
        Ok(target)
    }
}
