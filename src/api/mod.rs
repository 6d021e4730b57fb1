//! REST API server module
//!
//! Exposes submission, listing, cancellation and monitoring of the request
//! ledger over HTTP, with an OpenAPI 3.1 description of every route.

use crate::{Config, RequestManager, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Prefix every route is mounted under
pub const API_PREFIX: &str = "/api/v1";

/// Create the API router with all route definitions
///
/// # Routes
///
/// All paths are relative to `/api/v1`.
///
/// ## Requests
/// - `POST /requests` - Submit one request or a batch
/// - `GET /requests` - List requests (`?status=queued,failed` or `all`)
/// - `GET /requests/:id` - Get one request
/// - `DELETE /requests/:id` - Cancel one request
/// - `POST /requests/clear` - Cancel by ids or every active request
///
/// ## Queue
/// - `GET /queue` - Pending ids in service order
/// - `GET /stats` - Counts by status
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /startup` - What the manager found at startup
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent events stream
/// - `POST /shutdown` - Graceful shutdown
pub fn create_router(manager: RequestManager, config: Arc<Config>) -> Router {
    let state = AppState::new(manager, config.clone());

    let api = Router::new()
        // Requests
        .route("/requests", post(routes::submit_requests))
        .route("/requests", get(routes::list_requests))
        .route("/requests/clear", post(routes::clear_requests))
        .route("/requests/:id", get(routes::get_request))
        .route("/requests/:id", delete(routes::cancel_request))
        // Queue
        .route("/queue", get(routes::queue_snapshot))
        .route("/stats", get(routes::queue_stats))
        // System
        .route("/health", get(routes::health_check))
        .route("/startup", get(routes::startup_report))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .route("/shutdown", post(routes::shutdown))
        .with_state(state);

    let router = Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Serves until the manager shuts down, then lets in-flight responses finish.
///
/// # Example
///
/// ```no_run
/// use socialsweep::{Config, FetchRegistry, RequestManager};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default();
/// let registry = FetchRegistry::from_config(&config)?;
/// let manager = RequestManager::new(config.clone(), registry).await?;
///
/// // Serve until shutdown
/// socialsweep::api::start_api_server(manager, Arc::new(config)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(manager: RequestManager, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let shutdown = manager.shutdown_token.clone();
    let app = create_router(manager, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

impl RequestManager {
    /// Run the API server in a background task
    ///
    /// Uses the manager's own configuration for the bind address and CORS.
    pub fn spawn_api_server(&self) -> JoinHandle<Result<()>> {
        let manager = self.clone();
        let config = self.config.clone();
        tokio::spawn(async move { start_api_server(manager, config).await })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
