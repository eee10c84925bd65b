pub mod notifications;
pub mod producers;
pub mod subscriptions;

use crate::state::AppState;
use axum::{extract::State, response::Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// 服务状态
/// GET /api/inbox/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "currentTime": Utc::now().timestamp_millis(),
        "commitHash": state.config.commit_hash.clone().unwrap_or_default(),
    }))
}
