//! Versions listing (`?tab=versions&m=json`).

use std::cmp::Ordering;

use axum::Json;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use pkgdoc_module::path::series_path;
use pkgdoc_module::pick_latest;
use serde::Serialize;

use crate::error::ServerError;
use crate::handlers::{display_version, link_version};
use crate::state::AppState;

/// Known versions of a module, newest first.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionsResponse {
    module_path: String,
    versions: Vec<VersionEntry>,
    /// Other known modules of the same series (`a/b`, `a/b/v2`, ...).
    other_major_versions: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionEntry {
    version: String,
    formatted_version: String,
    commit_time: DateTime<Utc>,
    is_latest: bool,
}

/// Build the versions JSON document for `module_path`.
pub(crate) fn versions_json(state: &AppState, module_path: &str) -> Result<Response, ServerError> {
    let mut infos = state.data_source.module_versions(module_path)?;
    let latest = pick_latest(&infos, true).map(|info| info.version.clone());
    infos.sort_by(|a, b| b.version.compare(&a.version).unwrap_or(Ordering::Equal));

    let versions = infos
        .iter()
        .map(|info| VersionEntry {
            version: link_version(module_path, &info.version),
            formatted_version: display_version(module_path, &info.version),
            commit_time: info.commit_time,
            is_latest: latest.as_ref() == Some(&info.version),
        })
        .collect();

    let other_major_versions = state
        .data_source
        .series_modules(series_path(module_path))?
        .into_iter()
        .filter(|path| path != module_path)
        .collect();

    Ok(Json(VersionsResponse {
        module_path: module_path.to_owned(),
        versions,
        other_major_versions,
    })
    .into_response())
}
