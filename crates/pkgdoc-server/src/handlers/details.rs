//! Details route.
//!
//! Every path not matched by another route names a unit, optionally with a
//! version: `/<path>[@<version>][/<suffix>]`. The handler redirects, rejects,
//! schedules a background fetch, or summarizes the resolved unit. Every
//! response carries a `Cache-Control` header chosen from the request shape.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use pkgdoc_fetch::{FetchKey, ScheduleOutcome, TaskStatus};
use pkgdoc_module::{ModuleIdentity, path, pick_latest, stdlib};
use pkgdoc_resolve::{Redirect, RequestPath, TAB_OVERVIEW, TAB_VERSIONS, cache};
use pkgdoc_storage::STATUS_NOT_FOUND;
use serde::Serialize;

use crate::error::ServerError;
use crate::handlers::{display_version, link_version, versions};
use crate::state::AppState;

/// Summary of a resolved unit.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailsResponse {
    /// Full import path of the unit.
    path: String,
    /// Name of the unit.
    name: String,
    module_path: String,
    version: String,
    formatted_version: String,
    /// Unit path below the module root.
    suffix: String,
    tab: String,
    is_latest: bool,
    /// Unversioned link that follows the latest version.
    latest_link: String,
    /// Version-pinned link to this page.
    canonical_url: String,
    commit_time: DateTime<Utc>,
    is_redistributable: bool,
    has_go_mod: bool,
}

/// Handle GET for any path.
pub(crate) async fn get_details(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    let query = uri.query();

    let request = RequestPath::parse(&path, query);
    let automated_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(cache::is_automated_agent);
    let class = cache::decide(&request, automated_agent);

    let mut response = match state.redirector.route(&path, query) {
        Some(redirect) => redirect_response(&redirect),
        None => match details(&state, &request) {
            Ok(response) => response,
            Err(err) => err.into_response(),
        },
    };

    if let Ok(value) = HeaderValue::from_str(&state.cache_ttls.header_value(class)) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

fn redirect_response(redirect: &Redirect) -> Response {
    let status = match redirect {
        Redirect::Permanent(_) => StatusCode::MOVED_PERMANENTLY,
        Redirect::Temporary(_) => StatusCode::FOUND,
    };
    (status, [(header::LOCATION, redirect.location().to_owned())]).into_response()
}

fn details(state: &AppState, request: &RequestPath) -> Result<Response, ServerError> {
    if state.exclusions.is_excluded(&request.full_path) {
        return Err(ServerError::Excluded(request.full_path.clone()));
    }

    let resolution = state.resolver.resolve(request)?;
    if state.exclusions.is_excluded(&resolution.full_path) {
        return Err(ServerError::Excluded(resolution.full_path));
    }

    let Some(module) = &resolution.module else {
        return Err(schedule_fetch(
            state,
            &resolution.full_path,
            &resolution.candidates,
        ));
    };

    if request.tab.as_deref() == Some(TAB_VERSIONS) && request.json {
        return versions::versions_json(state, module.path());
    }

    let Some(info) = state
        .data_source
        .module_info(module.path(), module.version())?
    else {
        return Err(schedule_fetch(
            state,
            &resolution.full_path,
            std::slice::from_ref(module),
        ));
    };

    let Some(unit) = state.data_source.unit(&resolution.full_path, &info)? else {
        return Err(ServerError::NotFound {
            path: resolution.full_path,
            fetch_scheduled: false,
        });
    };

    let module_path = info.module_path.as_str();
    let suffix = path::suffix(&resolution.full_path, module_path).to_owned();
    let known_versions = state.data_source.module_versions(module_path)?;
    let is_latest =
        pick_latest(&known_versions, true).is_some_and(|latest| latest.version == info.version);

    let url_version = link_version(module_path, &info.version);
    let canonical_url = if module_path == stdlib::MODULE_PATH || suffix.is_empty() {
        format!("/{}@{url_version}", resolution.full_path)
    } else {
        format!("/{module_path}@{url_version}/{suffix}")
    };

    let response = DetailsResponse {
        path: unit.path,
        name: unit.name,
        module_path: module_path.to_owned(),
        version: url_version,
        formatted_version: display_version(module_path, &info.version),
        suffix,
        tab: request
            .tab
            .clone()
            .unwrap_or_else(|| TAB_OVERVIEW.to_owned()),
        is_latest,
        latest_link: format!("/{}", resolution.full_path),
        canonical_url,
        commit_time: info.commit_time,
        is_redistributable: info.is_redistributable && unit.is_redistributable,
        has_go_mod: info.has_go_mod,
    };

    Ok(Json(response).into_response())
}

/// Schedule fetches for unknown module identities.
///
/// Excluded candidates are skipped. A candidate whose fetch failed for good
/// (other than "does not exist") is reported as a processing failure.
fn schedule_fetch(state: &AppState, path: &str, candidates: &[ModuleIdentity]) -> ServerError {
    let mut fetch_scheduled = false;

    for candidate in candidates {
        if state.exclusions.is_excluded(candidate.path()) {
            continue;
        }
        let key = FetchKey::new(candidate.path(), candidate.version().to_string());
        match state.orchestrator.schedule(key.clone(), &state.experiments) {
            ScheduleOutcome::Enqueued | ScheduleOutcome::Coalesced | ScheduleOutcome::Backoff(_) => {
                fetch_scheduled = true;
            }
            ScheduleOutcome::Settled(TaskStatus::Failed { retryable: false }) => {
                if let Some(task) = state.orchestrator.status(&key)
                    && task.status_code != Some(STATUS_NOT_FOUND)
                {
                    return ServerError::FailedToProcess {
                        path: path.to_owned(),
                        reason: task.last_error.unwrap_or_default(),
                    };
                }
            }
            ScheduleOutcome::Settled(_) | ScheduleOutcome::Closed => {}
        }
    }

    ServerError::NotFound {
        path: path.to_owned(),
        fetch_scheduled,
    }
}
