//! Module proxy fetcher.
//!
//! Downloads a module version from a Go module proxy, derives its metadata
//! from the version info and zip listing, and stores it in the data source.
//!
//! Proxy endpoints used:
//! - `GET {base}/{module}/@latest` resolves `latest`
//! - `GET {base}/{module}/@v/{version}.info` resolves any other version
//! - `GET {base}/{module}/@v/{version}.zip` downloads the module contents
//! - `GET {base}/{module}/@v/list` lists the versions of a module
//!
//! The standard library is not a proxy module. Its sources come from the
//! `golang.org/toolchain` distributions, whose zips carry them under `src/`.
//!
//! Every request is bounded by the time left in the attempt's [`Budget`], and
//! the budget is checked again before anything is stored.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pkgdoc_module::{Candidate, LATEST, SemanticVersion, Version, pick_latest, stdlib};
use pkgdoc_storage::{DataSource, Module, ModuleInfo};
use serde::Deserialize;
use ureq::Agent;
use zip::ZipArchive;

use crate::fetcher::{Budget, ExperimentSet, FetchError, Fetcher};
use crate::task::FetchKey;

/// Default proxy.
pub const DEFAULT_PROXY_URL: &str = "https://proxy.golang.org";

/// Largest module zip accepted.
const MAX_ZIP_SIZE: u64 = 500 * 1024 * 1024;

/// Module publishing Go distributions as `v0.0.1-go1.21.0.linux-amd64`.
const TOOLCHAIN_MODULE: &str = "golang.org/toolchain";
const TOOLCHAIN_PREFIX: &str = "v0.0.1-";
const TOOLCHAIN_PLATFORM: &str = "linux-amd64";
/// Standard library sources within a toolchain zip.
const TOOLCHAIN_SOURCE_DIR: &str = "src/";

/// Response of the `.info` and `@latest` endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProxyInfo {
    version: String,
    time: DateTime<Utc>,
}

/// What the zip listing tells about a module version.
#[derive(Debug, Default, PartialEq, Eq)]
struct ZipContents {
    has_go_mod: bool,
    package_dirs: BTreeSet<String>,
}

/// A Go release available as a toolchain module version.
struct ToolchainRelease {
    version: Version,
    module_version: String,
}

impl Candidate for ToolchainRelease {
    fn version(&self) -> &Version {
        &self.version
    }
}

/// Fetcher backed by a module proxy.
#[derive(Clone)]
pub struct ProxyFetcher {
    agent: Agent,
    base_url: String,
    source: Arc<dyn DataSource>,
}

impl ProxyFetcher {
    /// Create a fetcher for the proxy at `base_url`.
    pub fn new(base_url: &str, source: Arc<dyn DataSource>) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_owned(),
            source,
        }
    }

    fn info_url(&self, module_path: &str, version: &str) -> String {
        let module = escape(module_path);
        if version == LATEST {
            format!("{}/{module}/@latest", self.base_url)
        } else {
            format!("{}/{module}/@v/{}.info", self.base_url, escape(version))
        }
    }

    fn zip_url(&self, module_path: &str, version: &str) -> String {
        format!(
            "{}/{}/@v/{}.zip",
            self.base_url,
            escape(module_path),
            escape(version)
        )
    }

    fn list_url(&self, module_path: &str) -> String {
        format!("{}/{}/@v/list", self.base_url, escape(module_path))
    }

    fn get(&self, url: &str, budget: &Budget) -> Result<ureq::Body, FetchError> {
        let remaining = budget.remaining()?;
        tracing::debug!(url, ?remaining, "Proxy request");
        let response = self
            .agent
            .get(url)
            .config()
            .timeout_global(Some(remaining))
            .build()
            .call()
            .map_err(|e| FetchError::Transient(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let mut body = response.into_body();
        if status < 400 {
            return Ok(body);
        }

        let message = body
            .read_to_string()
            .map(|text| text.trim().to_owned())
            .unwrap_or_default();
        let message = format!("{url}: {status} {message}");
        Err(match status {
            429 | 500.. => FetchError::Transient(message),
            _ => FetchError::NotFound(message),
        })
    }

    fn info(
        &self,
        module_path: &str,
        version: &str,
        budget: &Budget,
    ) -> Result<ProxyInfo, FetchError> {
        let url = self.info_url(module_path, version);
        self.get(&url, budget)?
            .read_json()
            .map_err(|e| FetchError::Malformed(format!("{url}: {e}")))
    }

    fn download(
        &self,
        module_path: &str,
        version: &str,
        budget: &Budget,
    ) -> Result<Vec<u8>, FetchError> {
        let url = self.zip_url(module_path, version);
        self.get(&url, budget)?
            .with_config()
            .limit(MAX_ZIP_SIZE)
            .read_to_vec()
            .map_err(|e| FetchError::Transient(format!("{url}: {e}")))
    }

    fn list(&self, module_path: &str, budget: &Budget) -> Result<Vec<String>, FetchError> {
        let url = self.list_url(module_path);
        let text = self
            .get(&url, budget)?
            .read_to_string()
            .map_err(|e| FetchError::Transient(format!("{url}: {e}")))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Fetch an ordinary module version.
    fn module(
        &self,
        module_path: &str,
        requested: &Version,
        budget: &Budget,
    ) -> Result<Module, FetchError> {
        let info = self.info(module_path, &requested.to_string(), budget)?;
        let version = Version::parse(&info.version)
            .ok()
            .filter(|v| !v.is_symbolic())
            .ok_or_else(|| {
                FetchError::Malformed(format!("proxy returned invalid version {:?}", info.version))
            })?;

        let bytes = self.download(module_path, &info.version, budget)?;
        let contents = read_zip(&bytes, &format!("{module_path}@{}/", info.version), "")?;

        let mut module_info = ModuleInfo::new(module_path, version, info.time);
        module_info.has_go_mod = contents.has_go_mod;
        let mut module = Module::new(module_info).with_unit(module_path);
        for dir in &contents.package_dirs {
            module = module.with_unit(format!("{module_path}/{dir}"));
        }
        Ok(module)
    }

    /// Fetch a standard library release from the toolchain distributions.
    fn stdlib_module(&self, requested: &Version, budget: &Budget) -> Result<Module, FetchError> {
        let module_version = match requested {
            Version::Latest => self.latest_toolchain(budget)?,
            Version::Semantic(semver) => toolchain_version(semver).ok_or_else(|| {
                FetchError::NotFound(format!("std@{requested}: not a Go release"))
            })?,
            Version::Master | Version::Pseudo(_) => {
                return Err(FetchError::NotFound(format!(
                    "std@{requested}: not a Go release"
                )));
            }
        };

        let info = self.info(TOOLCHAIN_MODULE, &module_version, budget)?;
        let version = toolchain_tag(&info.version)
            .and_then(|tag| stdlib::version_for_tag(tag).ok())
            .ok_or_else(|| {
                FetchError::Malformed(format!(
                    "proxy returned unexpected toolchain version {:?}",
                    info.version
                ))
            })?;

        let bytes = self.download(TOOLCHAIN_MODULE, &info.version, budget)?;
        let root = format!("{TOOLCHAIN_MODULE}@{}/", info.version);
        let contents = read_zip(&bytes, &root, TOOLCHAIN_SOURCE_DIR)?;

        let mut module_info =
            ModuleInfo::new(stdlib::MODULE_PATH, Version::Semantic(version), info.time);
        module_info.has_go_mod = contents.has_go_mod;
        let mut module = Module::new(module_info).with_unit(stdlib::MODULE_PATH);
        for dir in contents.package_dirs {
            module = module.with_unit(dir);
        }
        Ok(module)
    }

    /// Toolchain module version of the newest Go release.
    fn latest_toolchain(&self, budget: &Budget) -> Result<String, FetchError> {
        let releases: Vec<ToolchainRelease> = self
            .list(TOOLCHAIN_MODULE, budget)?
            .into_iter()
            .filter_map(|module_version| {
                let tag = toolchain_tag(&module_version)?;
                let version = stdlib::version_for_tag(tag).ok()?;
                Some(ToolchainRelease {
                    version: Version::Semantic(version),
                    module_version,
                })
            })
            .collect();

        pick_latest(&releases, false)
            .map(|release| release.module_version.clone())
            .ok_or_else(|| {
                FetchError::NotFound(format!("{TOOLCHAIN_MODULE}: no Go releases listed"))
            })
    }

    fn fetch_blocking(
        &self,
        key: &FetchKey,
        experiments: &ExperimentSet,
        budget: &Budget,
    ) -> Result<(), FetchError> {
        let requested = Version::parse(&key.version)
            .map_err(|e| FetchError::NotFound(e.to_string()))?;

        let module = if key.module_path == stdlib::MODULE_PATH {
            self.stdlib_module(&requested, budget)?
        } else if stdlib::contains(&key.module_path) {
            return Err(FetchError::NotFound(format!(
                "{}: standard library packages belong to the std module",
                key.module_path
            )));
        } else {
            self.module(&key.module_path, &requested, budget)?
        };

        budget.remaining()?;
        let units = module.units.len();
        let version = module.info.version.to_string();
        self.source.put_module(&requested, module).map_err(|e| {
            if e.is_retryable() {
                FetchError::Transient(e.to_string())
            } else {
                FetchError::Malformed(e.to_string())
            }
        })?;

        tracing::info!(
            module_path = %key.module_path,
            requested = %key.version,
            version,
            units,
            experiments = %experiments,
            "Stored module version"
        );
        Ok(())
    }
}

#[async_trait]
impl Fetcher for ProxyFetcher {
    async fn fetch(
        &self,
        key: &FetchKey,
        experiments: &ExperimentSet,
        budget: &Budget,
    ) -> Result<(), FetchError> {
        let fetcher = self.clone();
        let key = key.clone();
        let experiments = experiments.clone();
        let budget = budget.clone();
        tokio::task::spawn_blocking(move || fetcher.fetch_blocking(&key, &experiments, &budget))
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?
    }
}

/// Escape a module path or version for proxy URLs.
///
/// Upper-case letters become `!` followed by the lower-case letter.
fn escape(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Toolchain module version holding the sources of a Go release.
///
/// Releases from go1.21 on always carry a patch number (`go1.21.0`).
fn toolchain_version(version: &SemanticVersion) -> Option<String> {
    let mut tag = stdlib::tag_for_version(version)?;
    if version.minor >= 21 && version.patch == 0 && version.prerelease.is_empty() {
        tag.push_str(".0");
    }
    Some(format!("{TOOLCHAIN_PREFIX}{tag}.{TOOLCHAIN_PLATFORM}"))
}

/// Release tag of a toolchain module version for the default platform.
fn toolchain_tag(module_version: &str) -> Option<&str> {
    module_version
        .strip_prefix(TOOLCHAIN_PREFIX)?
        .strip_suffix(TOOLCHAIN_PLATFORM)?
        .strip_suffix('.')
}

/// List the package directories of a module zip.
///
/// Every entry must live under `root`; only entries below `root` +
/// `source_dir` are inspected, and directories are reported relative to it.
fn read_zip(bytes: &[u8], root: &str, source_dir: &str) -> Result<ZipContents, FetchError> {
    let archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchError::Malformed(format!("zip: {e}")))?;
    let mut contents = ZipContents::default();

    for name in archive.file_names() {
        let Some(relative) = name.strip_prefix(root) else {
            return Err(FetchError::Malformed(format!(
                "zip: file {name} is outside {root}"
            )));
        };
        let Some(relative) = relative.strip_prefix(source_dir) else {
            continue;
        };
        if relative == "go.mod" {
            contents.has_go_mod = true;
            continue;
        }
        if !relative.ends_with(".go") || relative.ends_with("_test.go") {
            continue;
        }
        let dir = relative.rsplit_once('/').map_or("", |(dir, _)| dir);
        if dir.split('/').any(is_ignored_dir) {
            continue;
        }
        if !dir.is_empty() {
            contents.package_dirs.insert(dir.to_owned());
        }
    }

    Ok(contents)
}

fn is_ignored_dir(segment: &str) -> bool {
    segment == "testdata" || segment == "vendor" || segment.starts_with(['.', '_'])
}
