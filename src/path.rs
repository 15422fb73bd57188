//! Store path helpers and cache path resolution.
//!
//! Store paths are absolute, `/`-separated strings. They never touch the
//! host filesystem here; `FsStore` maps them onto a directory.

use crate::compiler::Compiler;
use crate::group::Group;

// ============================================================================
// Path helpers
// ============================================================================

/// Extension of the last path segment, without the dot.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    let dot = name.rfind('.')?;
    (dot > 0 && dot + 1 < name.len()).then(|| &name[dot + 1..])
}

/// Last segment of a path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Replace the trailing extension with `ext`, or append it if there is none.
pub fn swap_extension(path: &str, ext: &str) -> String {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    let stem_end = match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => name_start + dot,
        _ => path.len(),
    };
    format!("{}.{}", &path[..stem_end], ext)
}

/// Join a root and a relative path with exactly one separator.
pub fn join(root: &str, rel: &str) -> String {
    let root = root.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    format!("{root}/{rel}")
}

/// `path` relative to `base`, without a leading separator.
///
/// Paths outside `base` come back with only their leading `/` removed.
pub fn relative_to<'a>(base: &str, path: &'a str) -> &'a str {
    let base = base.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => path.trim_start_matches('/'),
    }
}

/// Whether `path` is `root` itself or lies below it.
pub fn is_within(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path.starts_with('/');
    }
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Parent of a store path; `/` for top-level entries.
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

// ============================================================================
// PathResolver
// ============================================================================

/// Computes where compiled and consolidated artifacts live.
#[derive(Debug, Clone)]
pub struct PathResolver {
    group_root: String,
}

impl PathResolver {
    /// `group_root` is the cache root for groups without an override.
    pub fn new(group_root: impl Into<String>) -> Self {
        Self {
            group_root: group_root.into(),
        }
    }

    pub fn group_root(&self) -> &str {
        &self.group_root
    }

    /// Cache path of the artifact compiled from `source`.
    ///
    /// Grouped sources land under the group's cache root, keeping their
    /// path relative to the group node. Ungrouped sources are mirrored
    /// below the compiler's own cache root.
    pub fn resolve(&self, source: &str, group: Option<&Group>, compiler: &dyn Compiler) -> String {
        let swapped = swap_extension(source, compiler.output_extension());
        match group {
            Some(group) => join(
                self.cache_root_for(group),
                relative_to(&group.path, &swapped),
            ),
            None => join(compiler.cache_root(), &swapped),
        }
    }

    /// Path of the consolidated `<name>.<ext>` artifact for a group.
    pub fn consolidated(&self, group: &Group, ext: &str) -> String {
        join(
            self.cache_root_for(group),
            &format!("{}.{}", group.name, ext),
        )
    }

    fn cache_root_for<'a>(&'a self, group: &'a Group) -> &'a str {
        group.cache_path.as_deref().unwrap_or(&self.group_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOptions, SourceDescriptor};
    use crate::config::DEFAULT_GROUP_ROOT;
    use std::collections::BTreeMap;

    struct CoffeeScript {
        cache_root: &'static str,
    }

    impl Compiler for CoffeeScript {
        fn name(&self) -> &str {
            "coffeescript"
        }
        fn output_extension(&self) -> &str {
            "js"
        }
        fn accepts(&self, source: &SourceDescriptor) -> bool {
            source.extension() == Some("coffee")
        }
        fn cache_root(&self) -> &str {
            self.cache_root
        }
        fn compile(&self, source: &[u8], _: &CompileOptions) -> anyhow::Result<Vec<u8>> {
            Ok(source.to_vec())
        }
    }

    fn group(path: &str, cache_path: Option<&str>) -> Group {
        Group {
            name: "test".into(),
            path: path.into(),
            cache_path: cache_path.map(str::to_string),
            compile_options: BTreeMap::new(),
            hash: None,
            members: Vec::new(),
        }
    }

    #[test]
    fn test_swap_extension() {
        assert_eq!(swap_extension("/a/b/test.coffee", "js"), "/a/b/test.js");
        assert_eq!(swap_extension("/a/b.d/test", "js"), "/a/b.d/test.js");
        assert_eq!(swap_extension("/a/.hidden", "css"), "/a/.hidden.css");
        assert_eq!(swap_extension("/a/x.min.less", "css"), "/a/x.min.css");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/a/b.js"), Some("js"));
        assert_eq!(extension("/a.d/b"), None);
        assert_eq!(extension("/a/.hidden"), None);
        assert_eq!(extension("/a/trailing."), None);
    }

    #[test]
    fn test_join_and_relative() {
        assert_eq!(join("/", "a/b.js"), "/a/b.js");
        assert_eq!(join("/cache/", "/a.js"), "/cache/a.js");
        assert_eq!(relative_to("/g", "/g/sub/a.js"), "sub/a.js");
        assert_eq!(relative_to("/g", "/gx/a.js"), "gx/a.js");
    }

    #[test]
    fn test_is_within_and_parent() {
        assert!(is_within("/g/inventory", "/g/inventory"));
        assert!(is_within("/g/inventory/js", "/g/inventory"));
        assert!(!is_within("/g/inventory2", "/g/inventory"));
        assert!(is_within("/anything", "/"));
        assert_eq!(parent("/g/a.js"), "/g");
        assert_eq!(parent("/g"), "/");
    }

    #[test]
    fn test_resolve_with_cache_path_override() {
        let resolver = PathResolver::new(DEFAULT_GROUP_ROOT);
        let compiler = CoffeeScript { cache_root: "/compile/cache" };
        let g = group("/test/group/path", Some("/test/cache/path"));

        let path = resolver.resolve("/test/group/path/test.coffee", Some(&g), &compiler);
        assert_eq!(path, "/test/cache/path/test.js");
    }

    #[test]
    fn test_resolve_with_default_group_root() {
        let resolver = PathResolver::new(DEFAULT_GROUP_ROOT);
        let compiler = CoffeeScript { cache_root: "/compile/cache" };
        let g = group("/test/group/path", None);

        let path = resolver.resolve("/test/group/path/test.coffee", Some(&g), &compiler);
        assert_eq!(path, "/var/webresource/groups/test.js");
    }

    #[test]
    fn test_resolve_without_group() {
        let resolver = PathResolver::new(DEFAULT_GROUP_ROOT);
        let compiler = CoffeeScript { cache_root: "/compile/cache" };

        let path = resolver.resolve("/test/path/test.coffee", None, &compiler);
        assert_eq!(path, "/compile/cache/test/path/test.js");
        // resolving twice yields the same path
        assert_eq!(resolver.resolve("/test/path/test.coffee", None, &compiler), path);
    }

    #[test]
    fn test_consolidated_path() {
        let resolver = PathResolver::new(DEFAULT_GROUP_ROOT);
        assert_eq!(
            resolver.consolidated(&group("/apps/g", None), "js"),
            "/var/webresource/groups/test.js"
        );
        assert_eq!(
            resolver.consolidated(&group("/apps/g", Some("/apps/g/out")), "css"),
            "/apps/g/out/test.css"
        );
    }
}
