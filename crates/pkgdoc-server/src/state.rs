//! Application state.
//!
//! Shared state for all request handlers.

use std::sync::Arc;
use std::time::Duration;

use pkgdoc_config::Config;
use pkgdoc_fetch::{ExperimentSet, Orchestrator};
use pkgdoc_resolve::{CacheTtls, ExclusionList, PathResolver, Redirector, ShortcutTable};
use pkgdoc_storage::DataSource;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Module index and storage read path.
    pub(crate) data_source: Arc<dyn DataSource>,
    /// Request path resolver.
    pub(crate) resolver: PathResolver,
    /// Alias, shortcut and canonical-URL redirects.
    pub(crate) redirector: Redirector,
    /// Max-age per cache class.
    pub(crate) cache_ttls: CacheTtls,
    /// Paths that are never served or fetched.
    pub(crate) exclusions: ExclusionList,
    /// Experiments passed to every scheduled fetch.
    pub(crate) experiments: ExperimentSet,
    /// Background fetch orchestrator.
    pub(crate) orchestrator: Orchestrator,
}

impl AppState {
    /// Build handler state from configuration.
    pub(crate) fn new(
        config: &Config,
        data_source: Arc<dyn DataSource>,
        orchestrator: Orchestrator,
    ) -> Self {
        let shortcuts =
            ShortcutTable::standard_library().merged(config.paths.shortcuts.clone());
        let aliases = ShortcutTable::legacy_aliases().merged(config.paths.aliases.clone());

        Self {
            resolver: PathResolver::new(Arc::clone(&data_source), shortcuts.clone()),
            redirector: Redirector::new(aliases, shortcuts),
            cache_ttls: CacheTtls {
                tiny: Duration::from_secs(config.cache.tiny_secs),
                short: Duration::from_secs(config.cache.short_secs),
                default: Duration::from_secs(config.cache.default_secs),
                long: Duration::from_secs(config.cache.long_secs),
            },
            exclusions: ExclusionList::new(config.paths.excluded.iter().cloned()),
            experiments: ExperimentSet::new(config.paths.experiments.iter().cloned()),
            data_source,
            orchestrator,
        }
    }
}
