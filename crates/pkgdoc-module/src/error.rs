//! Error types for module identity and version parsing.

/// Error produced while parsing versions or building identities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// The version qualifier is not `latest`, `master` or a valid semantic version.
    #[error("{version} is not a valid semantic version")]
    InvalidVersion {
        /// Version string as supplied by the caller.
        version: String,
        /// Short description of the first syntax problem found.
        reason: &'static str,
    },

    /// The module path is empty or carries a version qualifier.
    #[error("invalid module path {path:?}: {reason}")]
    InvalidPath {
        /// Offending module path.
        path: String,
        /// Short description of the problem.
        reason: &'static str,
    },
}

impl ModuleError {
    pub(crate) fn invalid_version(version: &str, reason: &'static str) -> Self {
        Self::InvalidVersion {
            version: version.to_owned(),
            reason,
        }
    }
}
