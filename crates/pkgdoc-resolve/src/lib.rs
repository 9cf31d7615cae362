//! Request resolution for pkgdoc.
//!
//! Everything here is synchronous and free of shared mutable state:
//!
//! - [`RequestPath`]: raw components of a details request
//! - [`PathResolver`]: splits a request into module identity, version and suffix
//! - [`Redirector`]: legacy aliases, standard library shortcuts and URL
//!   canonicalization
//! - [`cache`]: cache lifetime class per request shape and client
//! - [`ExclusionList`]: administratively blocked path prefixes

pub mod cache;
mod error;
mod exclusion;
mod redirect;
mod request;
mod resolver;
mod shortcut;

pub use cache::{CacheClass, CacheTtls};
pub use error::{ResolveError, search_link};
pub use exclusion::ExclusionList;
pub use redirect::{Redirect, Redirector};
pub use request::{
    RequestPath, TAB_DOC, TAB_IMPORTED_BY, TAB_OVERVIEW, TAB_VERSIONS, is_default_tab,
    parse_query,
};
pub use resolver::{
    PathResolver, Resolution, candidate_module_paths, is_plausible_module_path, parse_version,
};
pub use shortcut::ShortcutTable;
