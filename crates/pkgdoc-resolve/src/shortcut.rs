//! Fixed name-to-target lookup tables.

use std::collections::HashMap;

/// Standard library packages reachable by their last path element.
const STANDARD_LIBRARY: &[(&str, &str)] = &[
    ("atomic", "sync/atomic"),
    ("base64", "encoding/base64"),
    ("big", "math/big"),
    ("bits", "math/bits"),
    ("cmplx", "math/cmplx"),
    ("csv", "encoding/csv"),
    ("exec", "os/exec"),
    ("filepath", "path/filepath"),
    ("gzip", "compress/gzip"),
    ("heap", "container/heap"),
    ("hex", "encoding/hex"),
    ("http", "net/http"),
    ("httptest", "net/http/httptest"),
    ("ioutil", "io/ioutil"),
    ("json", "encoding/json"),
    ("list", "container/list"),
    ("md5", "crypto/md5"),
    ("sha256", "crypto/sha256"),
    ("signal", "os/signal"),
    ("sql", "database/sql"),
    ("tar", "archive/tar"),
    ("tls", "crypto/tls"),
    ("url", "net/url"),
    ("user", "os/user"),
    ("utf8", "unicode/utf8"),
    ("xml", "encoding/xml"),
    ("zip", "archive/zip"),
];

/// Historical top-level aliases pointing at external documents.
const LEGACY_ALIASES: &[(&str, &str)] = &[("C", "https://golang.org/doc/articles/c_go_cgo.html")];

/// Read-only mapping from a bare top-level name to a target.
///
/// Used for standard library shortcuts (`http` → `net/http`) and for legacy
/// aliases (`C` → an external article).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcutTable {
    entries: HashMap<String, String>,
}

impl ShortcutTable {
    /// Built-in standard library shortcuts.
    pub fn standard_library() -> Self {
        Self::from_pairs(STANDARD_LIBRARY)
    }

    /// Built-in legacy aliases.
    pub fn legacy_aliases() -> Self {
        Self::from_pairs(LEGACY_ALIASES)
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(name, target)| ((*name).to_owned(), (*target).to_owned()))
                .collect(),
        }
    }

    /// Add entries, replacing existing ones with the same name.
    #[must_use]
    pub fn merged<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.entries
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Target for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_library() {
        let table = ShortcutTable::standard_library();
        assert_eq!(table.get("http"), Some("net/http"));
        assert_eq!(table.get("json"), Some("encoding/json"));
        assert_eq!(table.get("fmt"), None);
    }

    #[test]
    fn test_targets_are_standard_library_paths() {
        let table = ShortcutTable::standard_library();
        for (name, target) in STANDARD_LIBRARY {
            assert_eq!(table.get(name), Some(*target));
            assert!(pkgdoc_module::stdlib::contains(target), "{target}");
            assert!(target.ends_with(&format!("/{name}")), "{name} -> {target}");
        }
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(
            ShortcutTable::legacy_aliases().get("C"),
            Some("https://golang.org/doc/articles/c_go_cgo.html")
        );
    }

    #[test]
    fn test_merged_overrides() {
        let table = ShortcutTable::standard_library().merged([("http", "net/http/v2"), ("yaml", "encoding/yaml")]);
        assert_eq!(table.get("http"), Some("net/http/v2"));
        assert_eq!(table.get("yaml"), Some("encoding/yaml"));
        assert_eq!(table.len(), STANDARD_LIBRARY.len() + 1);
        assert!(!table.is_empty());
        assert!(ShortcutTable::default().is_empty());
    }
}
