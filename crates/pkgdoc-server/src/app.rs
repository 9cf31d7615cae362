//! Router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::security;
use crate::state::AppState;

/// Create the application router.
///
/// Every path is a details path, so the details handler is the fallback.
pub(crate) fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(get(handlers::details::get_details))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(security::csp_layer())
                .layer(security::content_type_options_layer())
                .layer(security::referrer_policy_layer()),
        )
        .with_state(state)
}
