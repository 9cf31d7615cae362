//! Cache lifetime policy for details responses.
//!
//! Decision order, first match wins:
//!
//! 1. automated agent → [`CacheClass::Tiny`]
//! 2. tab showing aggregate data (versions, importers) → [`CacheClass::Default`]
//! 3. version pinned on the default tab → [`CacheClass::Long`]
//! 4. otherwise → [`CacheClass::Short`]

use std::time::Duration;

use serde::Serialize;

use crate::request::{RequestPath, TAB_IMPORTED_BY, TAB_VERSIONS, is_default_tab};

/// User agent fragments identifying crawlers, matched case-insensitively.
const AGENT_MARKERS: [&str; 4] = ["bot", "crawl", "spider", "slurp"];

/// Cache lifetime class, ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheClass {
    /// Responses served to automated agents.
    Tiny,
    /// Content that changes when a new version is published.
    Short,
    /// Content derived from aggregate state.
    Default,
    /// Content at a pinned version.
    Long,
}

/// Max-age for each [`CacheClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Max-age for [`CacheClass::Tiny`].
    pub tiny: Duration,
    /// Max-age for [`CacheClass::Short`].
    pub short: Duration,
    /// Max-age for [`CacheClass::Default`].
    pub default: Duration,
    /// Max-age for [`CacheClass::Long`].
    pub long: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            tiny: Duration::from_secs(60),
            short: Duration::from_secs(10 * 60),
            default: Duration::from_secs(60 * 60),
            long: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheTtls {
    /// Max-age for a class.
    pub fn max_age(&self, class: CacheClass) -> Duration {
        match class {
            CacheClass::Tiny => self.tiny,
            CacheClass::Short => self.short,
            CacheClass::Default => self.default,
            CacheClass::Long => self.long,
        }
    }

    /// `Cache-Control` header value for a class.
    pub fn header_value(&self, class: CacheClass) -> String {
        format!("public, max-age={}", self.max_age(class).as_secs())
    }
}

/// Choose the cache class for a details request.
pub fn decide(request: &RequestPath, automated_agent: bool) -> CacheClass {
    if automated_agent {
        return CacheClass::Tiny;
    }
    if matches!(request.tab.as_deref(), Some(TAB_VERSIONS | TAB_IMPORTED_BY)) {
        return CacheClass::Default;
    }
    if request.is_versioned() && request.tab.as_deref().is_none_or(is_default_tab) {
        return CacheClass::Long;
    }
    CacheClass::Short
}

/// Whether a `User-Agent` header value identifies a crawler.
pub fn is_automated_agent(user_agent: &str) -> bool {
    let user_agent = user_agent.to_ascii_lowercase();
    AGENT_MARKERS
        .iter()
        .any(|marker| user_agent.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AHREFS: &str = "Mozilla/5.0 (compatible; AhrefsBot/7.0; +http://ahrefs.com/robot/)";

    fn decide_for(path: &str, query: Option<&str>) -> CacheClass {
        decide(&RequestPath::parse(path, query), false)
    }

    #[test]
    fn test_decide_table() {
        for (path, query, want) in [
            ("/host.com/module@v1.2.3/suffix", None, CacheClass::Long),
            ("/host.com/module/suffix", None, CacheClass::Short),
            ("/host.com/module@v1.2.3/suffix", Some("tab=overview"), CacheClass::Long),
            ("/host.com/module@v1.2.3/suffix", Some("tab=versions"), CacheClass::Default),
            ("/host.com/module@v1.2.3/suffix", Some("tab=importedby"), CacheClass::Default),
            ("/host.com/module/suffix", Some("tab=versions"), CacheClass::Default),
            ("/host.com/module@v1.2.3/suffix", Some("tab=licenses"), CacheClass::Short),
            ("/host.com/module/suffix", Some("tab=licenses"), CacheClass::Short),
            ("/mod/host.com/module@v1.2.3/suffix", None, CacheClass::Long),
            ("/mod/host.com/module/suffix", None, CacheClass::Short),
            ("/mod/host.com/module@v1.2.3/suffix", Some("tab=overview"), CacheClass::Long),
            ("/mod/host.com/module@v1.2.3/suffix", Some("tab=versions"), CacheClass::Default),
            ("/mod/host.com/module@v1.2.3/suffix", Some("tab=importedby"), CacheClass::Default),
        ] {
            assert_eq!(decide_for(path, query), want, "{path}?{query:?}");
        }
    }

    #[test]
    fn test_pinned_secondary_tabs_are_short() {
        for (query, want) in [
            ("tab=licenses", CacheClass::Short),
            ("tab=imports", CacheClass::Short),
            ("tab=doc", CacheClass::Long),
            ("tab=overview", CacheClass::Long),
        ] {
            assert_eq!(decide_for("/host.com/module@v1.2.3", Some(query)), want, "{query}");
        }
    }

    #[test]
    fn test_decide_agent_overrides_pinning() {
        let req = RequestPath::parse("/host.com/module@v1.2.3/suffix", Some("tab=overview"));
        assert_eq!(decide(&req, is_automated_agent(AHREFS)), CacheClass::Tiny);
    }

    #[test]
    fn test_is_automated_agent() {
        assert!(is_automated_agent(AHREFS));
        assert!(is_automated_agent("Googlebot/2.1"));
        assert!(is_automated_agent("Baiduspider"));
        assert!(is_automated_agent("Yahoo! Slurp"));
        assert!(!is_automated_agent(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36"
        ));
        assert!(!is_automated_agent(""));
    }

    #[test]
    fn test_classes_are_ordered() {
        assert!(CacheClass::Tiny < CacheClass::Short);
        assert!(CacheClass::Short < CacheClass::Default);
        assert!(CacheClass::Default < CacheClass::Long);
    }

    #[test]
    fn test_ttls_are_monotonic() {
        let ttls = CacheTtls::default();
        let classes = [
            CacheClass::Tiny,
            CacheClass::Short,
            CacheClass::Default,
            CacheClass::Long,
        ];
        for pair in classes.windows(2) {
            assert!(ttls.max_age(pair[0]) < ttls.max_age(pair[1]));
        }
        assert_eq!(ttls.header_value(CacheClass::Long), "public, max-age=86400");
    }
}
