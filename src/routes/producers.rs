use crate::{
    error::{AppError, Result},
    models::notification::NotificationType,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::DateTime;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(producer_statuses))
        .route("/:producer/set-since", post(set_cursor))
}

/// 各生产者的状态与游标
/// GET /api/inbox/producers
async fn producer_statuses(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "producers": state.producer_registry.statuses() }))
}

/// 运维恢复入口：以显式时间水位手工重跑一个生产者
/// POST /api/inbox/producers/:producer/set-since
async fn set_cursor(
    State(state): State<Arc<AppState>>,
    Path(producer): Path<String>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    let notification_type: NotificationType = producer
        .parse()
        .map_err(|_| AppError::NotFound(format!("Invalid producer: {}", producer)))?;
    let scheduler = state.producer_registry.get_producer(notification_type)?;

    let since = body
        .get("since")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation("Invalid request: missing 'since'."))?;
    let since = DateTime::parse_from_rfc3339(since).map_err(|_| {
        AppError::Validation(format!(
            "Invalid request: invalid value for 'since': {} (not a date).",
            since
        ))
    })?;

    info!(
        "Manually running producer {} since {}",
        notification_type, since
    );
    scheduler.run_since(since.timestamp_millis()).await?;

    Ok(StatusCode::NO_CONTENT)
}
