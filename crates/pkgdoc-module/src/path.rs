//! Module path helpers.
//!
//! A *series* groups the major-version variants of one module: `a/b` and
//! `a/b/v2` share the series path `a/b`, and `gopkg.in/yaml.v1` and
//! `gopkg.in/yaml.v2` share `gopkg.in/yaml`.

const GOPKG_IN: &str = "gopkg.in/";

/// Split a module path into its series prefix and major-version suffix.
///
/// The suffix keeps its separator (`/v2`, `.v1`) and is empty when the path
/// has none. `v0` and `v1` are not major-version suffixes outside `gopkg.in`.
pub fn split_path_version(path: &str) -> (&str, &str) {
    if path.starts_with(GOPKG_IN) {
        if let Some(dot) = path.rfind(".v")
            && is_major(path[dot + 2..].trim_end_matches("-unstable"), true)
        {
            return path.split_at(dot);
        }
        return (path, "");
    }

    if let Some(slash) = path.rfind('/')
        && let Some(major) = path[slash + 1..].strip_prefix('v')
        && is_major(major, false)
    {
        return path.split_at(slash);
    }
    (path, "")
}

fn is_major(digits: &str, allow_low: bool) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return false;
    }
    allow_low || !matches!(digits, "0" | "1")
}

/// Series path for a module path.
pub fn series_path(module_path: &str) -> &str {
    split_path_version(module_path).0
}

/// The part of `full_path` below `base_path`, without a leading slash.
///
/// Assumes `base_path` is a prefix of `full_path`; equal paths yield `""`.
pub fn suffix<'a>(full_path: &'a str, base_path: &str) -> &'a str {
    let rest = full_path.strip_prefix(base_path).unwrap_or(full_path);
    rest.strip_prefix('/').unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_split_path_version() {
        for (path, want) in [
            ("github.com/a/b", ("github.com/a/b", "")),
            ("github.com/a/b/v2", ("github.com/a/b", "/v2")),
            ("github.com/a/b/v1", ("github.com/a/b/v1", "")),
            ("github.com/a/b/v02", ("github.com/a/b/v02", "")),
            ("github.com/a/b/vendor", ("github.com/a/b/vendor", "")),
            ("gopkg.in/yaml.v2", ("gopkg.in/yaml", ".v2")),
            ("gopkg.in/yaml.v1", ("gopkg.in/yaml", ".v1")),
            ("gopkg.in/check.v1-unstable", ("gopkg.in/check", ".v1-unstable")),
            ("gopkg.in/yaml", ("gopkg.in/yaml", "")),
            ("std", ("std", "")),
        ] {
            assert_eq!(split_path_version(path), want, "{path}");
        }
    }

    #[test]
    fn test_series_path() {
        assert_eq!(series_path("a.com/b/v2"), "a.com/b");
        assert_eq!(series_path("a.com/b"), "a.com/b");
        assert_eq!(series_path("gopkg.in/yaml.v2"), "gopkg.in/yaml");
    }

    #[test]
    fn test_suffix() {
        assert_eq!(suffix("a.com/b/c/d", "a.com/b"), "c/d");
        assert_eq!(suffix("a.com/b", "a.com/b"), "");
        assert_eq!(suffix("net/http", "std"), "net/http");
    }
}
