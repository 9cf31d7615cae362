//! Standard library module path and release tags.
//!
//! The standard library is published as a single module whose releases are
//! tagged `go1`, `go1.13`, `go1.13.2`, `go1.14beta1` or `go1.14rc2` rather than
//! with semantic versions. These helpers map between the two forms.

use crate::error::ModuleError;
use crate::version::{Identifier, SemanticVersion};

/// Module path of the standard library.
pub const MODULE_PATH: &str = "std";

const TAG_PREFIX: &str = "go";
const PRERELEASE_KINDS: [&str; 2] = ["beta", "rc"];

/// Whether `path` belongs to the standard library.
///
/// Standard library import paths have no dot in their first element.
pub fn contains(path: &str) -> bool {
    match path.split('/').next() {
        Some(first) if !first.is_empty() => !first.contains('.'),
        _ => false,
    }
}

/// Whether `s` looks like a standard library release tag.
pub fn is_tag(s: &str) -> bool {
    s.strip_prefix(TAG_PREFIX)
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

/// Convert a release tag such as `go1.14rc2` to its semantic version.
///
/// # Errors
///
/// Returns [`ModuleError::InvalidVersion`] when `tag` is not a release tag.
pub fn version_for_tag(tag: &str) -> Result<SemanticVersion, ModuleError> {
    let invalid = |reason| ModuleError::invalid_version(tag, reason);
    let rest = tag
        .strip_prefix(TAG_PREFIX)
        .ok_or_else(|| invalid("missing go prefix"))?;

    let split = rest
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let (numbers, pre) = rest.split_at(split);

    let parts = numbers
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("expected a number"));
            }
            part.parse::<u64>().map_err(|_| invalid("number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if parts.len() > 3 {
        return Err(invalid("too many version components"));
    }

    let mut version = SemanticVersion::new(
        parts[0],
        parts.get(1).copied().unwrap_or(0),
        parts.get(2).copied().unwrap_or(0),
    );

    if !pre.is_empty() {
        let kind = PRERELEASE_KINDS
            .iter()
            .find(|kind| pre.starts_with(**kind))
            .ok_or_else(|| invalid("unknown pre-release kind"))?;
        let n = &pre[kind.len()..];
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a pre-release number"));
        }
        let n = n.parse().map_err(|_| invalid("number out of range"))?;
        version.prerelease = vec![Identifier::Alpha((*kind).to_owned()), Identifier::Numeric(n)];
    }

    Ok(version)
}

/// Convert a semantic version back to its release tag.
///
/// Returns `None` for versions that have no tag form.
pub fn tag_for_version(version: &SemanticVersion) -> Option<String> {
    if version.major != 1 || version.incompatible {
        return None;
    }

    let base = match (version.minor, version.patch) {
        (0, 0) => format!("{TAG_PREFIX}1"),
        (minor, 0) => format!("{TAG_PREFIX}1.{minor}"),
        (minor, patch) => format!("{TAG_PREFIX}1.{minor}.{patch}"),
    };

    match version.prerelease.as_slice() {
        [] => Some(base),
        [Identifier::Alpha(kind), Identifier::Numeric(n)]
            if version.patch == 0 && PRERELEASE_KINDS.contains(&kind.as_str()) =>
        {
            Some(format!("{base}{kind}{n}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_contains() {
        assert!(contains("net/http"));
        assert!(contains("fmt"));
        assert!(contains("std"));
        assert!(!contains("github.com/foo/bar"));
        assert!(!contains("golang.org/x/net"));
        assert!(!contains(""));
    }

    #[test]
    fn test_is_tag() {
        assert!(is_tag("go1.13"));
        assert!(is_tag("go1"));
        assert!(!is_tag("gopher"));
        assert!(!is_tag("v1.13.0"));
    }

    #[test]
    fn test_version_for_tag() {
        for (tag, want) in [
            ("go1", "v1.0.0"),
            ("go1.13", "v1.13.0"),
            ("go1.13.2", "v1.13.2"),
            ("go1.14beta1", "v1.14.0-beta.1"),
            ("go1.14rc2", "v1.14.0-rc.2"),
        ] {
            assert_eq!(version_for_tag(tag).unwrap().to_string(), want, "{tag}");
        }
    }

    #[test]
    fn test_version_for_tag_invalid() {
        for tag in ["v1.13.0", "go", "go1.x", "go1.14alpha1", "go1.14rc", "go1.2.3.4"] {
            assert!(version_for_tag(tag).is_err(), "{tag} should be invalid");
        }
    }

    #[test]
    fn test_tag_for_version_round_trip() {
        for tag in ["go1", "go1.13", "go1.13.2", "go1.14beta1", "go1.14rc2"] {
            let version = version_for_tag(tag).unwrap();
            assert_eq!(tag_for_version(&version).as_deref(), Some(tag));
        }
    }

    #[test]
    fn test_tag_for_version_without_tag_form() {
        assert_eq!(tag_for_version(&SemanticVersion::new(2, 0, 0)), None);
        let mut incompatible = SemanticVersion::new(1, 2, 0);
        incompatible.incompatible = true;
        assert_eq!(tag_for_version(&incompatible), None);
    }
}
