/// Administratively excluded path prefixes.
///
/// A path is excluded when it equals a prefix or lies below it. Excluded
/// paths are never fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    prefixes: Vec<String>,
}

impl ExclusionList {
    /// Create a list from prefixes. Trailing slashes are ignored.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.into().trim_end_matches('/').to_owned())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `path` is excluded.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}
