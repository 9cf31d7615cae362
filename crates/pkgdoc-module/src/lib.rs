//! Module identity and version semantics for pkgdoc.
//!
//! This crate provides the leaf types every other pkgdoc crate builds on:
//!
//! - [`Version`]: parsed version qualifier (`latest`, `master`, pseudo-versions,
//!   semantic versions with optional `+incompatible`)
//! - [`pick_latest`]: latest-version selection over a set of candidates
//! - [`ModuleIdentity`]: a module path paired with a version
//! - [`path`]: series path, suffix and major-version helpers
//! - [`stdlib`]: standard library module path and release tag mapping
//!
//! # Example
//!
//! ```
//! use pkgdoc_module::Version;
//!
//! let v = Version::parse("v0.0.0-20140414041502-123456789012").unwrap();
//! assert!(v.is_pseudo());
//! assert_eq!(v.format(), "v0.0.0-...-1234567");
//!
//! let a = Version::parse("v1.0.0+incompatible").unwrap();
//! let b = Version::parse("v1.0.0").unwrap();
//! assert!(a < b);
//! ```

mod error;
mod identity;
pub mod path;
pub mod stdlib;
mod version;

pub use error::ModuleError;
pub use identity::ModuleIdentity;
pub use version::{
    Candidate, Identifier, LATEST, MASTER, PseudoVersion, SemanticVersion, Version, pick_latest,
};
