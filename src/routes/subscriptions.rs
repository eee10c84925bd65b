use crate::{
    error::{AppError, Result},
    models::subscription::SubscriptionDetails,
    state::AppState,
    utils::validation::{validate_email_format, validate_eth_address},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_subscriptions))
        .route("/:address", get(get_subscription).put(put_subscription))
        .route("/:address/email", put(put_subscription_email))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionsQuery {
    /// 逗号分隔的地址列表
    pub addresses: String,
}

/// 批量查询订阅偏好
/// GET /api/inbox/subscriptions?addresses=0x..,0x..
async fn get_subscriptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubscriptionsQuery>,
) -> Result<Json<Value>> {
    let addresses: Vec<String> = query
        .addresses
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if addresses.is_empty() {
        return Err(AppError::bad_request("Missing addresses"));
    }
    for address in &addresses {
        validate_eth_address(address)?;
    }

    let subscriptions = state
        .subscription_service
        .find_subscriptions_for_addresses(addresses)
        .await?;

    Ok(Json(serde_json::json!({ "subscriptions": subscriptions })))
}

/// 查询订阅偏好；没有存储记录时返回规范默认值
/// GET /api/inbox/subscriptions/:address
async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<Value>> {
    validate_eth_address(&address)?;

    let subscription = state
        .subscription_service
        .get_subscription(&address)
        .await?;

    Ok(Json(serde_json::to_value(subscription)?))
}

/// 覆盖订阅偏好
/// PUT /api/inbox/subscriptions/:address
async fn put_subscription(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    validate_eth_address(&address)?;

    // 未知的 message_type 键在这里同步拒绝，而不是静默忽略
    let details: SubscriptionDetails = serde_json::from_value(body)
        .map_err(|e| AppError::Validation(format!("Invalid subscription details: {}", e)))?;

    debug!("Saving subscription details for {}", address);
    state
        .subscription_service
        .save_details(&address, details)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PutEmailPayload {
    pub email: Option<String>,
}

/// 设置或清除订阅邮箱
/// PUT /api/inbox/subscriptions/:address/email
async fn put_subscription_email(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(payload): Json<PutEmailPayload>,
) -> Result<StatusCode> {
    validate_eth_address(&address)?;

    if let Some(email) = &payload.email {
        validate_email_format(email)?;
    }

    state
        .subscription_service
        .save_email(&address, payload.email)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
