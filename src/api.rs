pub(crate) mod admin;
pub(crate) mod health;
pub(crate) mod metrics;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/admin/backfill", post(admin::run_backfill))
        .route("/admin/resources/{id}/check", post(admin::check_resource))
        .route("/admin/changes/{id}/deliver", post(admin::deliver_change))
        .with_state(state)
}
