//! In-memory module index.

use std::collections::HashMap;
use std::sync::RwLock;

use pkgdoc_module::path::series_path;
use pkgdoc_module::{Version, pick_latest};

use crate::storage::{DataSource, Module, ModuleInfo, StorageError, Unit};

/// In-memory [`DataSource`].
///
/// Holds every stored module version keyed by module path, plus the concrete
/// versions that symbolic requests (`master`) resolved to when fetched.
///
/// # Example
///
/// ```
/// use chrono::DateTime;
/// use pkgdoc_module::Version;
/// use pkgdoc_storage::{DataSource, MemoryDataSource, Module, ModuleInfo};
///
/// let info = ModuleInfo::new(
///     "github.com/a/b",
///     Version::parse("v1.0.0").unwrap(),
///     DateTime::UNIX_EPOCH,
/// );
/// let source = MemoryDataSource::new().with_module(Module::new(info).with_unit("github.com/a/b/c"));
///
/// assert!(source.is_known_module("github.com/a/b").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    modules: RwLock<HashMap<String, Vec<Module>>>,
    aliases: RwLock<HashMap<(String, String), Version>>,
}

impl MemoryDataSource {
    /// Create an empty data source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module version.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn with_module(self, module: Module) -> Self {
        self.insert(module);
        self
    }

    fn insert(&self, module: Module) {
        let mut modules = self.modules.write().unwrap();
        let versions = modules.entry(module.info.module_path.clone()).or_default();
        versions.retain(|m| m.info.version != module.info.version);
        versions.push(module);
    }
}

impl DataSource for MemoryDataSource {
    fn module_versions(&self, module_path: &str) -> Result<Vec<ModuleInfo>, StorageError> {
        let modules = self.modules.read().unwrap();
        Ok(modules
            .get(module_path)
            .map(|versions| versions.iter().map(|m| m.info.clone()).collect())
            .unwrap_or_default())
    }

    fn series_modules(&self, series: &str) -> Result<Vec<String>, StorageError> {
        let modules = self.modules.read().unwrap();
        let mut paths: Vec<String> = modules
            .iter()
            .filter(|(path, versions)| !versions.is_empty() && series_path(path) == series)
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn is_known_module(&self, module_path: &str) -> Result<bool, StorageError> {
        let modules = self.modules.read().unwrap();
        Ok(modules.get(module_path).is_some_and(|v| !v.is_empty()))
    }

    fn module_info(
        &self,
        module_path: &str,
        requested: &Version,
    ) -> Result<Option<ModuleInfo>, StorageError> {
        let infos = self.module_versions(module_path)?;
        let wanted = match requested {
            Version::Latest => return Ok(pick_latest(&infos, true).cloned()),
            Version::Master => {
                let aliases = self.aliases.read().unwrap();
                match aliases.get(&(module_path.to_owned(), requested.to_string())) {
                    Some(version) => version.clone(),
                    None => return Ok(None),
                }
            }
            concrete => concrete.clone(),
        };
        Ok(infos.into_iter().find(|info| info.version == wanted))
    }

    fn unit(&self, full_path: &str, module: &ModuleInfo) -> Result<Option<Unit>, StorageError> {
        let modules = self.modules.read().unwrap();
        Ok(modules
            .get(&module.module_path)
            .and_then(|versions| versions.iter().find(|m| m.info.version == module.version))
            .and_then(|m| m.units.iter().find(|u| u.path == full_path))
            .cloned())
    }

    fn put_module(&self, requested: &Version, module: Module) -> Result<(), StorageError> {
        if requested.is_symbolic() {
            self.aliases.write().unwrap().insert(
                (module.info.module_path.clone(), requested.to_string()),
                module.info.version.clone(),
            );
        }
        self.insert(module);
        Ok(())
    }
}
