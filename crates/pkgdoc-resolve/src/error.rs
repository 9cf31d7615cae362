use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use pkgdoc_storage::StorageError;

/// Characters escaped in a query value.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Error produced while resolving a request path.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The version qualifier is malformed.
    #[error("{version} is not a valid semantic version.")]
    InvalidVersion {
        /// Version as written in the request.
        version: String,
        /// Search page link suggested in place of the request.
        search_link: String,
    },

    /// No prefix of the path is a plausible module path.
    #[error("{path} is not a valid import path.")]
    ImplausiblePath {
        /// Path as written in the request.
        path: String,
        /// Search page link suggested in place of the request.
        search_link: String,
    },

    /// The module index could not be consulted.
    #[error("module lookup failed: {0}")]
    Storage(#[from] StorageError),
}

impl ResolveError {
    /// Suggested search link, for errors caused by the request.
    pub fn search_link(&self) -> Option<&str> {
        match self {
            Self::InvalidVersion { search_link, .. } | Self::ImplausiblePath { search_link, .. } => {
                Some(search_link)
            }
            Self::Storage(_) => None,
        }
    }
}

/// Search page link for a request path: `/search?q=<escaped path>`.
///
/// The path is unescaped first, so already-escaped input is not escaped twice.
pub fn search_link(path: &str) -> String {
    let unescaped = percent_decode_str(path).decode_utf8_lossy();
    format!("/search?q={}", utf8_percent_encode(&unescaped, QUERY_VALUE))
}
