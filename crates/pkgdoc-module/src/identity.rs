use std::fmt;

use serde::Serialize;

use crate::error::ModuleError;
use crate::stdlib;
use crate::version::Version;

/// A module path paired with a version.
///
/// The path is never empty and never carries an `@version` qualifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleIdentity {
    #[serde(rename = "modulePath")]
    path: String,
    version: Version,
}

impl ModuleIdentity {
    /// Create an identity, validating the module path.
    pub fn new(path: impl Into<String>, version: Version) -> Result<Self, ModuleError> {
        let path = path.into();
        let reason = if path.is_empty() {
            Some("module path is empty")
        } else if path.contains('@') {
            Some("module path carries a version qualifier")
        } else if path.starts_with('/') || path.ends_with('/') || path.contains("//") {
            Some("module path has an empty element")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ModuleError::InvalidPath { path, reason });
        }
        Ok(Self { path, version })
    }

    /// Module path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether this identity names the standard library.
    pub fn is_stdlib(&self) -> bool {
        self.path == stdlib::MODULE_PATH
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}
