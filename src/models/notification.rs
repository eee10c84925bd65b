use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ItemSold,
    BidAccepted,
    BidReceived,
    RoyaltiesEarned,
    LandRented,
    LandRentalEnded,
}

impl NotificationType {
    /// 当前已知的全部通知类型
    pub const ALL: [NotificationType; 6] = [
        NotificationType::ItemSold,
        NotificationType::BidAccepted,
        NotificationType::BidReceived,
        NotificationType::RoyaltiesEarned,
        NotificationType::LandRented,
        NotificationType::LandRentalEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ItemSold => "item_sold",
            NotificationType::BidAccepted => "bid_accepted",
            NotificationType::BidReceived => "bid_received",
            NotificationType::RoyaltiesEarned => "royalties_earned",
            NotificationType::LandRented => "land_rented",
            NotificationType::LandRentalEnded => "land_rental_ended",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid notification type: {}", s))
    }
}

/// 生产者产出的通知候选记录，以 (event_key, type, address) 为业务键
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    /// 为 None 时表示广播通知（面向所有用户）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub event_key: String,
    pub metadata: serde_json::Value,
    pub timestamp: i64,
}

/// 已持久化的通知行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: Uuid,
    pub event_key: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub address: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: i64,
    pub read_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// 查询联表时携带的广播已读标记，仅在列表查询中出现
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_read_at: Option<i64>,
}

impl NotificationRow {
    /// 合并目标已读与广播已读后的有效已读状态
    pub fn is_read(&self) -> bool {
        self.read_at.is_some() || self.broadcast_read_at.is_some()
    }
}

/// 单条 upsert 的结果：新插入或命中业务键后被更新
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    Inserted(NotificationRow),
    Updated(NotificationRow),
}

impl UpsertOutcome {
    pub fn row(&self) -> &NotificationRow {
        match self {
            UpsertOutcome::Inserted(row) | UpsertOutcome::Updated(row) => row,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}
