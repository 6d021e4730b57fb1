//! OpenAPI documentation and schema generation
//!
//! The socialsweep REST API described with utoipa at compile time.

use utoipa::OpenApi;

/// OpenAPI documentation for the socialsweep REST API
///
/// Served as JSON at `/api/v1/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "socialsweep REST API",
        version = "0.1.0",
        description = "Submit, monitor and cancel durable time-windowed retrieval requests",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790/api/v1", description = "Local development server")
    ),
    paths(
        // Requests
        crate::api::routes::submit_requests,
        crate::api::routes::list_requests,
        crate::api::routes::get_request,
        crate::api::routes::cancel_request,
        crate::api::routes::clear_requests,

        // Queue
        crate::api::routes::queue_snapshot,
        crate::api::routes::queue_stats,

        // System
        crate::api::routes::health_check,
        crate::api::routes::startup_report,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
        crate::api::routes::shutdown,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::RequestId,
        crate::types::Status,
        crate::types::Priority,
        crate::types::ErrorClass,
        crate::types::Window,
        crate::types::DateRange,
        crate::types::RequestParams,
        crate::types::Progress,
        crate::types::RequestError,
        crate::types::Request,
        crate::types::NewRequest,
        crate::types::RequestSummary,
        crate::types::SubmitResult,
        crate::types::SubmitOutcome,
        crate::types::ClearResult,
        crate::types::ClearOutcome,
        crate::types::QueueStats,
        crate::types::Event,

        // Manager reports
        crate::manager::StartupReport,
        crate::manager::CorruptStateReport,

        // Route bodies
        crate::api::routes::SubmitBody,
        crate::api::routes::ListQuery,
        crate::api::routes::ClearBody,
        crate::api::routes::QueueView,

        // Error types
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "requests", description = "Submission, listing and cancellation"),
        (name = "queue", description = "Queue order and counters"),
        (name = "system", description = "Health, events, OpenAPI specification and shutdown")
    )
)]
pub struct ApiDoc;
