//! Request shape parsing.
//!
//! A details request has the form
//! `/<path>[@<version>][/<suffix>][?tab=<name>][&page=<n>][&m=json]`,
//! optionally under the legacy `/mod/` namespace.

use percent_encoding::percent_decode_str;

/// Default tab for package pages.
pub const TAB_OVERVIEW: &str = "overview";
/// Alternative name of the default tab.
pub const TAB_DOC: &str = "doc";
/// Version list tab.
pub const TAB_VERSIONS: &str = "versions";
/// Importers tab.
pub const TAB_IMPORTED_BY: &str = "importedby";

const LEGACY_MODULE_PREFIX: &str = "mod/";

/// Whether `tab` names the default tab.
pub fn is_default_tab(tab: &str) -> bool {
    tab == TAB_OVERVIEW || tab == TAB_DOC
}

/// Raw components of one details request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPath {
    /// Import path of the requested unit, without version or slashes at
    /// either end.
    pub full_path: String,
    /// Text before `@` for versioned requests, `full_path` otherwise.
    pub base_path: String,
    /// Version qualifier as written, if any.
    pub explicit_version: Option<String>,
    /// Text after `@version/`, empty when absent.
    pub suffix: String,
    /// Selected tab.
    pub tab: Option<String>,
    /// Page number for paginated tabs.
    pub page: Option<u32>,
    /// Whether the machine-readable (`m=json`) variant was requested.
    pub json: bool,
}

impl RequestPath {
    /// Split a URL path and query string into request components.
    ///
    /// The `/mod/` prefix is stripped. Unparseable `page` values are ignored.
    pub fn parse(path: &str, query: Option<&str>) -> Self {
        let path = path.strip_prefix('/').unwrap_or(path);
        let path = path.strip_prefix(LEGACY_MODULE_PREFIX).unwrap_or(path);

        let (base_path, explicit_version, suffix) = match path.split_once('@') {
            Some((base, rest)) => {
                let (version, suffix) = rest.split_once('/').unwrap_or((rest, ""));
                (base, Some(version.to_owned()), suffix.trim_end_matches('/'))
            }
            None => (path.trim_end_matches('/'), None, ""),
        };

        let full_path = if suffix.is_empty() {
            base_path.trim_end_matches('/').to_owned()
        } else {
            format!("{}/{suffix}", base_path.trim_end_matches('/'))
        };

        let mut request = Self {
            full_path,
            base_path: base_path.to_owned(),
            explicit_version,
            suffix: suffix.to_owned(),
            ..Self::default()
        };

        for (key, value) in parse_query(query.unwrap_or_default()) {
            match key.as_str() {
                "tab" => request.tab = Some(value),
                "page" => request.page = value.parse().ok(),
                "m" => request.json = value == "json",
                _ => {}
            }
        }
        request
    }

    /// Whether the request pins an explicit version.
    pub fn is_versioned(&self) -> bool {
        self.explicit_version.is_some()
    }

    /// Whether the request selects the default tab (or none).
    pub fn is_default_tab(&self) -> bool {
        self.tab.as_deref().is_none_or(is_default_tab)
    }
}

/// Decode a query string into key/value pairs, in order.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}
