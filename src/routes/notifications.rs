use crate::{
    error::{AppError, Result},
    models::notification::{NotificationRecord, NotificationType},
    state::AppState,
    utils::validation::{is_eth_address, validate_eth_address},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 50;

// 2023-01-01T00:00:00Z，早于该时间的事件不可能是有效通知
const MIN_TIMESTAMP: i64 = 1_672_531_200_000;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications).post(publish_notifications))
        .route("/read", post(read_notifications))
        .route("/:id", get(get_notification))
}

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub address: String,
    pub from: Option<i64>,
    #[serde(rename = "onlyUnread")]
    pub only_unread: Option<bool>,
    pub limit: Option<i64>,
}

/// 超出 [1, 50] 的 limit 回退到默认值
fn effective_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if (1..=MAX_LIMIT).contains(&limit) => limit,
        _ => DEFAULT_LIMIT,
    }
}

/// 查询收件箱
/// GET /api/inbox/notifications?address=&from=&onlyUnread=&limit=
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Value>> {
    validate_eth_address(&query.address)?;

    let from = query.from.unwrap_or(0).max(0);
    let limit = effective_limit(query.limit);
    let only_unread = query.only_unread.unwrap_or(false);

    debug!(
        "Listing notifications for {} (onlyUnread: {}, from: {}, limit: {})",
        query.address, only_unread, from, limit
    );

    let notifications = state
        .notification_service
        .find_notifications(vec![query.address], only_unread, from, limit)
        .await?;

    let slim: Vec<Value> = notifications
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "type": n.notification_type,
                "address": n.address,
                "metadata": n.metadata,
                "timestamp": n.timestamp,
                "read": n.is_read(),
            })
        })
        .collect();

    Ok(Json(json!({ "notifications": slim })))
}

/// 按 id 查询单条通知
/// GET /api/inbox/notifications/:id
async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let id = Uuid::parse_str(&id)?;

    let notification = state
        .notification_service
        .find_notification(id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    Ok(Json(serde_json::to_value(notification)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotificationsPayload {
    pub address: String,
    pub notification_ids: Vec<String>,
}

/// 标记通知为已读
/// POST /api/inbox/notifications/read
async fn read_notifications(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReadNotificationsPayload>,
) -> Result<Json<Value>> {
    validate_eth_address(&payload.address)?;

    if payload.notification_ids.is_empty() {
        return Err(AppError::bad_request("Missing notificationIds"));
    }

    let notification_ids = payload
        .notification_ids
        .iter()
        .map(|id| Uuid::parse_str(id))
        .collect::<std::result::Result<Vec<Uuid>, _>>()?;

    let updated = state
        .notification_service
        .mark_notifications_as_read(payload.address, notification_ids)
        .await?;

    Ok(Json(json!({ "updated": updated })))
}

/// 由内部服务直接发布通知候选
/// POST /api/inbox/notifications
async fn publish_notifications(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<StatusCode> {
    let records = validate_notification_records(&body).map_err(|e| {
        warn!("Invalid notification object received: {} ({})", e, body);
        e
    })?;

    state
        .notification_service
        .save_notifications(records)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 对外部输入做同步校验：非法内容直接拒绝，不落库
fn validate_notification_records(body: &Value) -> Result<Vec<NotificationRecord>> {
    let items = body
        .as_array()
        .ok_or_else(|| AppError::validation("Expected an array of notifications"))?;

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let type_str = item
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::validation("Missing notification type"))?;
        let notification_type: NotificationType = type_str
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid notification type: {}", type_str)))?;

        let address = match item.get("address") {
            None | Some(Value::Null) => None,
            Some(Value::String(address)) if is_eth_address(address) => Some(address.clone()),
            Some(other) => {
                return Err(AppError::Validation(format!("Invalid address: {}", other)));
            }
        };

        let event_key = item
            .get("eventKey")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::validation("Missing eventKey"))?
            .to_string();

        let metadata = item
            .get("metadata")
            .filter(|m| m.is_object())
            .cloned()
            .ok_or_else(|| AppError::validation("Missing metadata object"))?;

        let timestamp = item
            .get("timestamp")
            .and_then(Value::as_i64)
            .filter(|t| *t > MIN_TIMESTAMP)
            .ok_or_else(|| AppError::validation("Invalid or missing timestamp"))?;

        records.push(NotificationRecord {
            notification_type,
            address,
            event_key,
            metadata,
            timestamp,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_falls_back_to_default_outside_the_valid_range() {
        assert_eq!(effective_limit(None), 20);
        assert_eq!(effective_limit(Some(0)), 20);
        assert_eq!(effective_limit(Some(-5)), 20);
        assert_eq!(effective_limit(Some(51)), 20);
        assert_eq!(effective_limit(Some(1)), 1);
        assert_eq!(effective_limit(Some(50)), 50);
        assert_eq!(effective_limit(Some(35)), 35);
    }

    fn valid_record() -> Value {
        json!({
            "type": "item_sold",
            "address": "0x24e5f44999c151f08609f8e27b2238c773c4d020",
            "eventKey": "0xtx1",
            "metadata": {"title": "Item Sold", "description": "Sold!"},
            "timestamp": 1_700_000_000_000i64
        })
    }

    #[test]
    fn accepts_valid_records_including_broadcast_ones() {
        let records = validate_notification_records(&json!([valid_record()])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].notification_type, NotificationType::ItemSold);

        let mut broadcast = valid_record();
        broadcast.as_object_mut().unwrap().remove("address");
        let records = validate_notification_records(&json!([broadcast])).unwrap();
        assert_eq!(records[0].address, None);
    }

    #[test]
    fn rejects_unknown_types_bad_addresses_and_stale_timestamps() {
        let mut unknown_type = valid_record();
        unknown_type["type"] = json!("governance_proposal");
        assert!(validate_notification_records(&json!([unknown_type])).is_err());

        let mut bad_address = valid_record();
        bad_address["address"] = json!("not-an-address");
        assert!(validate_notification_records(&json!([bad_address])).is_err());

        let mut stale = valid_record();
        stale["timestamp"] = json!(1_000_000_000_000i64);
        assert!(validate_notification_records(&json!([stale])).is_err());

        let mut no_metadata = valid_record();
        no_metadata["metadata"] = json!("oops");
        assert!(validate_notification_records(&json!([no_metadata])).is_err());

        assert!(validate_notification_records(&json!({"not": "an array"})).is_err());
    }
}
