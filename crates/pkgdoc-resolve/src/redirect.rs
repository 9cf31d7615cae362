//! Canonicalization and legacy redirects.

use crate::request::{is_default_tab, parse_query};
use crate::shortcut::ShortcutTable;

/// A redirect decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `301 Moved Permanently`.
    Permanent(String),
    /// `302 Found`.
    Temporary(String),
}

impl Redirect {
    /// HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Permanent(_) => 301,
            Self::Temporary(_) => 302,
        }
    }

    /// `Location` header value.
    pub fn location(&self) -> &str {
        match self {
            Self::Permanent(location) | Self::Temporary(location) => location,
        }
    }
}

/// Produces redirects for legacy aliases, standard library shortcuts,
/// trailing slashes and explicit default tabs.
#[derive(Debug, Clone)]
pub struct Redirector {
    aliases: ShortcutTable,
    shortcuts: ShortcutTable,
}

impl Default for Redirector {
    fn default() -> Self {
        Self::new(
            ShortcutTable::legacy_aliases(),
            ShortcutTable::standard_library(),
        )
    }
}

impl Redirector {
    /// Create a redirector from alias and shortcut tables.
    pub fn new(aliases: ShortcutTable, shortcuts: ShortcutTable) -> Self {
        Self { aliases, shortcuts }
    }

    /// Redirect for a request, if any.
    ///
    /// Rules are checked in order:
    /// 1. legacy alias → permanent redirect to its external target
    /// 2. standard library shortcut → temporary redirect to the full path,
    ///    keeping the version qualifier and dropping a trailing slash
    /// 3. trailing slash → permanent redirect without it
    /// 4. the only query parameter selects the default tab → temporary
    ///    redirect without the query
    pub fn route(&self, path: &str, query: Option<&str>) -> Option<Redirect> {
        let trimmed = path.trim_start_matches('/');

        if let Some(target) = self.aliases.get(trimmed) {
            return Some(Redirect::Permanent(target.to_owned()));
        }

        let bare = trimmed.trim_end_matches('/');
        let (name, version) = match bare.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (bare, None),
        };
        if !name.contains('/')
            && let Some(target) = self.shortcuts.get(name)
        {
            let location = match version {
                Some(version) => format!("/{target}@{version}"),
                None => format!("/{target}"),
            };
            return Some(Redirect::Temporary(location));
        }

        if path.len() > 1 && path.ends_with('/') {
            return Some(Redirect::Permanent(with_query(
                &format!("/{bare}"),
                query,
            )));
        }

        if let [(key, value)] = parse_query(query.unwrap_or_default()).as_slice()
            && key == "tab"
            && is_default_tab(value)
        {
            return Some(Redirect::Temporary(path.to_owned()));
        }

        None
    }
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path.to_owned(),
    }
}
