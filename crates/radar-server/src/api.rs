//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `devices` - Presence of configured devices
//! - `unknown` - Unknown addresses from the last round
//! - `health` - Service health checks
//! - `system` - Daemon status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod system;
pub mod unknown;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /devices           - All devices with presence
/// ├── /devices/{id}      - One device
/// ├── /unknown           - Unknown addresses from the last round
/// ├── /system/status     - Daemon status
/// └── /openapi.json      - OpenAPI specification
/// /swagger-ui            - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/devices", devices::router())
                .route("/unknown", get(unknown::list_unknown))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/system", system::router()),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures;

    #[test]
    fn test_router_builds_without_conflicts() {
        let _router = create_router(fixtures::state());
    }
}
