//! Operator triggers. Each runs one unit of work synchronously and reports it.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{app::AppState, notify::NotifyError};

pub(crate) async fn run_backfill(State(state): State<AppState>) -> Response {
    match state.backfill().reconcile().await {
        Ok(report) => {
            info!(enqueued = report.enqueued, "manual backfill finished");
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(error) => {
            warn!(error = %error, "manual backfill failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}")).into_response()
        }
    }
}

/// Lock the resource and queue a monitor job now, regardless of its due time.
pub(crate) async fn check_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<Uuid>,
) -> Response {
    match state.dispatcher().dispatch_one(resource_id).await {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(error) => {
            warn!(resource_id = %resource_id, error = %error, "manual check dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}")).into_response()
        }
    }
}

pub(crate) async fn deliver_change(
    State(state): State<AppState>,
    Path(change_id): Path<Uuid>,
) -> Response {
    match state.notifier().deliver(change_id).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(error @ NotifyError::ChangeMissing(_)) => {
            (StatusCode::NOT_FOUND, error.to_string()).into_response()
        }
        Err(error) => {
            warn!(change_id = %change_id, error = %error, "manual delivery failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}
