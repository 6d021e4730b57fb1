//! Request submission, listing and cancellation handlers.

use super::{ClearBody, ListQuery, SubmitBody};
use crate::api::AppState;
use crate::error::ApiError;
use crate::types::{ClearResult, ClearTarget, RequestId, StatusFilter, SubmitResult};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /requests - Submit one request or a batch
///
/// A single request answers 201 when queued, 200 when the id already exists
/// and 422 when rejected. A batch always answers 200 with one outcome per item.
#[utoipa::path(
    post,
    path = "/api/v1/requests",
    tag = "requests",
    request_body = SubmitBody,
    responses(
        (status = 201, description = "Request queued", body = crate::types::SubmitOutcome),
        (status = 200, description = "Already known, or batch outcomes", body = Vec<crate::types::SubmitOutcome>),
        (status = 422, description = "Request rejected", body = crate::types::SubmitOutcome),
        (status = 503, description = "Manager is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_requests(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Response {
    match body {
        SubmitBody::Single(request) => match state.manager.submit(request).await {
            Ok(outcome) => {
                let status = match outcome.result {
                    SubmitResult::Queued => StatusCode::CREATED,
                    SubmitResult::AlreadyExists { .. } => StatusCode::OK,
                    SubmitResult::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, Json(outcome)).into_response()
            }
            Err(e) => {
                tracing::warn!(error = %e, "submission failed");
                e.into_response()
            }
        },
        SubmitBody::Batch(batch) => match state.manager.submit_batch(batch).await {
            Ok(outcomes) => (StatusCode::OK, Json(outcomes)).into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "batch submission failed");
                e.into_response()
            }
        },
    }
}

/// GET /requests - List requests, optionally filtered by status
#[utoipa::path(
    get,
    path = "/api/v1/requests",
    tag = "requests",
    params(ListQuery),
    responses(
        (status = 200, description = "Request summaries in submission order", body = Vec<crate::types::RequestSummary>),
        (status = 400, description = "Malformed status filter", body = crate::error::ApiError)
    )
)]
pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = match query.status.as_deref().map(StatusFilter::parse) {
        None => StatusFilter::All,
        Some(Ok(filter)) => filter,
        Some(Err(e)) => return ApiError::validation(e.to_string()).into_response(),
    };

    let requests = state.manager.list_requests(&filter).await;
    (StatusCode::OK, Json(requests)).into_response()
}

/// GET /requests/:id - Get one request
#[utoipa::path(
    get,
    path = "/api/v1/requests/{id}",
    tag = "requests",
    params(
        ("id" = String, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Request record", body = crate::types::Request),
        (status = 404, description = "Request not found", body = crate::error::ApiError)
    )
)]
pub async fn get_request(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.get_request(&RequestId::from(id)).await {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /requests/:id - Cancel one request
#[utoipa::path(
    delete,
    path = "/api/v1/requests/{id}",
    tag = "requests",
    params(
        ("id" = String, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Cancelled or already terminal", body = crate::types::ClearOutcome),
        (status = 404, description = "Request not found", body = crate::types::ClearOutcome)
    )
)]
pub async fn cancel_request(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let target = ClearTarget::Ids(vec![RequestId::from(id)]);
    match state.manager.clear_requests(target).await {
        Ok(mut outcomes) => match outcomes.pop() {
            Some(outcome) if outcome.result == ClearResult::NotFound => {
                (StatusCode::NOT_FOUND, Json(outcome)).into_response()
            }
            Some(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(e) => {
            tracing::error!(error = %e, "cancel failed");
            e.into_response()
        }
    }
}

/// POST /requests/clear - Cancel by ids, or every active request
#[utoipa::path(
    post,
    path = "/api/v1/requests/clear",
    tag = "requests",
    request_body = ClearBody,
    responses(
        (status = 200, description = "Outcome per id", body = Vec<crate::types::ClearOutcome>),
        (status = 400, description = "Neither ids nor all_active given", body = crate::error::ApiError)
    )
)]
pub async fn clear_requests(State(state): State<AppState>, Json(body): Json<ClearBody>) -> Response {
    let target = match (body.all_active, body.ids) {
        (true, None) => ClearTarget::AllActive,
        (false, Some(ids)) => ClearTarget::Ids(ids),
        (true, Some(_)) => {
            return ApiError::validation("give either ids or all_active, not both").into_response();
        }
        (false, None) => {
            return ApiError::validation("give ids or set all_active").into_response();
        }
    };

    match state.manager.clear_requests(target).await {
        Ok(outcomes) => (StatusCode::OK, Json(outcomes)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "clear failed");
            e.into_response()
        }
    }
}
