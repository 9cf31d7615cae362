//! Request path resolution.
//!
//! The boundary between module path and package suffix cannot be read from
//! the path itself, so every plausible prefix is a candidate module path and
//! the module index picks the longest one it knows.

use std::sync::Arc;

use pkgdoc_module::{ModuleError, ModuleIdentity, Version, path, stdlib};
use pkgdoc_storage::DataSource;

use crate::error::{ResolveError, search_link};
use crate::request::RequestPath;
use crate::shortcut::ShortcutTable;

/// Hosting sites whose module paths need an owner and a repository element.
const DEEP_HOSTS: [&str; 2] = ["github.com", "bitbucket.org"];

/// Outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Import path of the requested unit.
    pub full_path: String,
    /// Requested version (`latest` when the request is unversioned).
    pub version: Version,
    /// Version qualifier as written in the request.
    pub explicit_version: Option<String>,
    /// Plausible module identities, most specific first.
    pub candidates: Vec<ModuleIdentity>,
    /// The most specific candidate known to the module index.
    pub module: Option<ModuleIdentity>,
}

impl Resolution {
    /// Path of the unit below the resolved module, if one was found.
    pub fn suffix(&self) -> Option<&str> {
        self.module
            .as_ref()
            .map(|module| path::suffix(&self.full_path, module.path()))
    }

    /// Whether the request pinned a version.
    pub fn is_versioned(&self) -> bool {
        self.explicit_version.is_some()
    }
}

/// Splits request paths into module identity, version and suffix.
pub struct PathResolver {
    data_source: Arc<dyn DataSource>,
    shortcuts: ShortcutTable,
}

impl PathResolver {
    /// Create a resolver over a module index.
    pub fn new(data_source: Arc<dyn DataSource>, shortcuts: ShortcutTable) -> Self {
        Self {
            data_source,
            shortcuts,
        }
    }

    /// Resolve a request.
    ///
    /// Standard library shortcuts map straight to their full path. Versioned
    /// requests name their module path explicitly (the text before `@`);
    /// unversioned requests try every plausible prefix, longest first.
    pub fn resolve(&self, request: &RequestPath) -> Result<Resolution, ResolveError> {
        let (full_path, base_path) = match self.shortcuts.get(&request.base_path) {
            Some(target) if request.suffix.is_empty() => (target.to_owned(), target.to_owned()),
            _ => (request.full_path.clone(), request.base_path.clone()),
        };

        let implausible = || ResolveError::ImplausiblePath {
            path: request.full_path.clone(),
            search_link: search_link(&request.full_path),
        };

        if base_path.is_empty() || base_path.ends_with('/') {
            return Err(implausible());
        }
        let is_stdlib = stdlib::contains(&base_path);

        let version = match &request.explicit_version {
            None => Version::Latest,
            Some(raw) => {
                parse_version(raw, is_stdlib).map_err(|_| ResolveError::InvalidVersion {
                    version: raw.clone(),
                    search_link: search_link(&request.full_path),
                })?
            }
        };

        let paths: Vec<&str> = if is_stdlib {
            if full_path.split('/').any(str::is_empty) {
                Vec::new()
            } else {
                vec![stdlib::MODULE_PATH]
            }
        } else if request.is_versioned() {
            if is_plausible_module_path(&base_path) {
                vec![base_path.as_str()]
            } else {
                Vec::new()
            }
        } else {
            candidate_module_paths(&full_path)
        };
        if paths.is_empty() {
            return Err(implausible());
        }

        let candidates = paths
            .into_iter()
            .map(|p| ModuleIdentity::new(p, version.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| implausible())?;

        let mut module = None;
        for candidate in &candidates {
            if self.data_source.is_known_module(candidate.path())? {
                module = Some(candidate.clone());
                break;
            }
        }

        tracing::debug!(
            full_path = %full_path,
            version = %version,
            candidates = candidates.len(),
            module = module.as_ref().map(ModuleIdentity::path),
            "Resolved request path"
        );

        Ok(Resolution {
            full_path,
            version,
            explicit_version: request.explicit_version.clone(),
            candidates,
            module,
        })
    }
}

/// Parse a version qualifier, accepting release tags for standard library
/// paths.
pub fn parse_version(raw: &str, stdlib_path: bool) -> Result<Version, ModuleError> {
    if stdlib_path && stdlib::is_tag(raw) {
        return stdlib::version_for_tag(raw).map(Version::Semantic);
    }
    Version::parse(raw)
}

/// Plausible module paths that are prefixes of `full_path`, longest first.
///
/// The first element must contain a dot. `github.com` and `bitbucket.org`
/// paths need at least three elements, others at least two.
pub fn candidate_module_paths(full_path: &str) -> Vec<&str> {
    if full_path.split('/').any(str::is_empty) {
        return Vec::new();
    }
    let first = full_path.split('/').next().unwrap_or_default();
    if !first.contains('.') {
        return Vec::new();
    }
    let min_elements = if DEEP_HOSTS.contains(&first) { 3 } else { 2 };

    let mut ends: Vec<usize> = full_path.match_indices('/').map(|(i, _)| i).collect();
    ends.push(full_path.len());
    ends.iter()
        .skip(min_elements - 1)
        .rev()
        .map(|&end| &full_path[..end])
        .collect()
}

/// Whether `path` could be a module path on its own.
pub fn is_plausible_module_path(path: &str) -> bool {
    !candidate_module_paths(path).is_empty()
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use pkgdoc_storage::{MemoryDataSource, Module, ModuleInfo};
    use pretty_assertions::assert_eq;

    use super::*;

    fn module(path: &str, version: &str) -> Module {
        Module::new(ModuleInfo::new(
            path,
            Version::parse(version).unwrap(),
            DateTime::UNIX_EPOCH,
        ))
    }

    fn resolver() -> PathResolver {
        let source = MemoryDataSource::new()
            .with_module(module("github.com/a/b", "v1.0.0"))
            .with_module(module("github.com/a/b/c", "v0.1.0"))
            .with_module(module("std", "v1.13.0"));
        PathResolver::new(Arc::new(source), ShortcutTable::standard_library())
    }

    fn resolve(path: &str) -> Result<Resolution, ResolveError> {
        resolver().resolve(&RequestPath::parse(path, None))
    }

    #[test]
    fn test_candidate_module_paths() {
        assert_eq!(
            candidate_module_paths("github.com/a/b/c/d"),
            vec!["github.com/a/b/c/d", "github.com/a/b/c", "github.com/a/b"]
        );
        assert_eq!(
            candidate_module_paths("example.com/x/y"),
            vec!["example.com/x/y", "example.com/x"]
        );
        assert!(candidate_module_paths("github.com/foo").is_empty());
        assert!(candidate_module_paths("example.com").is_empty());
        assert!(candidate_module_paths("net/http").is_empty());
        assert!(candidate_module_paths("a.com//b").is_empty());
        assert!(candidate_module_paths("").is_empty());
    }

    #[test]
    fn test_longest_known_prefix_wins() {
        let res = resolve("/github.com/a/b/c/d").unwrap();
        assert_eq!(res.module.as_ref().unwrap().path(), "github.com/a/b/c");
        assert_eq!(res.suffix(), Some("d"));

        let res = resolve("/github.com/a/b/x/y").unwrap();
        assert_eq!(res.module.as_ref().unwrap().path(), "github.com/a/b");
        assert_eq!(res.suffix(), Some("x/y"));
        assert_eq!(res.version, Version::Latest);
    }

    #[test]
    fn test_inner_module_reachable_at_root() {
        let res = resolve("/github.com/a/b/c").unwrap();
        assert_eq!(res.module.as_ref().unwrap().path(), "github.com/a/b/c");
        assert_eq!(res.suffix(), Some(""));
    }

    #[test]
    fn test_unknown_path_lists_candidates() {
        let res = resolve("/example.com/unknown/pkg").unwrap();
        assert_eq!(res.module, None);
        let paths: Vec<&str> = res.candidates.iter().map(ModuleIdentity::path).collect();
        assert_eq!(paths, vec!["example.com/unknown/pkg", "example.com/unknown"]);
    }

    #[test]
    fn test_versioned_request_names_module() {
        let res = resolve("/github.com/a/b@v1.0.0/c/d").unwrap();
        assert_eq!(res.full_path, "github.com/a/b/c/d");
        assert_eq!(res.candidates.len(), 1);
        assert_eq!(res.module.as_ref().unwrap().path(), "github.com/a/b");
        assert_eq!(res.version, Version::parse("v1.0.0").unwrap());
        assert!(res.is_versioned());
    }

    #[test]
    fn test_stdlib() {
        let res = resolve("/net/http@go1.13").unwrap();
        assert_eq!(res.module.as_ref().unwrap().path(), "std");
        assert_eq!(res.version, Version::parse("v1.13.0").unwrap());
        assert_eq!(res.suffix(), Some("net/http"));
    }

    #[test]
    fn test_shortcut_resolves_without_lookup() {
        let res = resolve("/http").unwrap();
        assert_eq!(res.full_path, "net/http");
        assert_eq!(res.module.as_ref().unwrap().path(), "std");
    }

    #[test]
    fn test_go_tag_rejected_outside_stdlib() {
        assert!(matches!(
            resolve("/github.com/a/b@go1.13"),
            Err(ResolveError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_invalid_version() {
        let err = resolve("/github.com/valid/module_name@v1-2/foo").unwrap_err();
        assert_eq!(err.to_string(), "v1-2 is not a valid semantic version.");
        assert_eq!(
            err.search_link(),
            Some("/search?q=github.com%2Fvalid%2Fmodule_name%2Ffoo")
        );
    }

    #[test]
    fn test_implausible_paths() {
        for path in ["/github.com/foo", "/gocloud.dev/@latest/blob", "/", "/example.com"] {
            assert!(
                matches!(resolve(path), Err(ResolveError::ImplausiblePath { .. })),
                "{path} should be implausible"
            );
        }
    }
}
