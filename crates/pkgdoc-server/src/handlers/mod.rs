//! HTTP request handlers.

pub(crate) mod details;
pub(crate) mod versions;

use pkgdoc_module::{Version, stdlib};

/// Version as shown to readers: standard library releases use their tag
/// (`go1.13`), pseudo-versions are shortened.
pub(crate) fn display_version(module_path: &str, version: &Version) -> String {
    match std_tag(module_path, version) {
        Some(tag) => tag,
        None => version.format(),
    }
}

/// Version as written in URLs.
pub(crate) fn link_version(module_path: &str, version: &Version) -> String {
    match std_tag(module_path, version) {
        Some(tag) => tag,
        None => version.to_string(),
    }
}

fn std_tag(module_path: &str, version: &Version) -> Option<String> {
    if module_path != stdlib::MODULE_PATH {
        return None;
    }
    version.semver().and_then(stdlib::tag_for_version)
}
