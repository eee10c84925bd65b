use crate::models::notification::NotificationType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 单个通知类型的推送渠道开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannelSettings {
    pub email: bool,
    pub in_app: bool,
}

impl Default for NotificationChannelSettings {
    fn default() -> Self {
        Self {
            email: true,
            in_app: true,
        }
    }
}

/// 用户订阅偏好
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default)]
    pub ignore_all_email: bool,
    #[serde(default)]
    pub ignore_all_in_app: bool,
    pub message_type: HashMap<NotificationType, NotificationChannelSettings>,
}

impl Default for SubscriptionDetails {
    fn default() -> Self {
        default_subscription()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub address: String,
    pub email: Option<String>,
    pub details: SubscriptionDetails,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// 无存储记录时的规范默认订阅
    pub fn default_for(address: &str, now: i64) -> Self {
        Self {
            address: address.to_lowercase(),
            email: None,
            details: default_subscription(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 默认订阅偏好：不屏蔽任何渠道，所有已知类型的 email/in_app 均开启
pub fn default_subscription() -> SubscriptionDetails {
    SubscriptionDetails {
        ignore_all_email: false,
        ignore_all_in_app: false,
        message_type: NotificationType::ALL
            .into_iter()
            .map(|t| (t, NotificationChannelSettings::default()))
            .collect(),
    }
}

/// 读取时对存储中的偏好做自愈迁移：
/// 丢弃已不存在的通知类型，补齐缺失的已知类型
pub fn sanitize_details(stored: serde_json::Value) -> SubscriptionDetails {
    let ignore_all_email = stored
        .get("ignore_all_email")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let ignore_all_in_app = stored
        .get("ignore_all_in_app")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let stored_types: HashMap<String, NotificationChannelSettings> = stored
        .get("message_type")
        .cloned()
        .and_then(|v| {
            serde_json::from_value::<HashMap<String, serde_json::Value>>(v)
                .ok()
                .map(|raw| {
                    raw.into_iter()
                        .filter_map(|(key, value)| {
                            serde_json::from_value::<NotificationChannelSettings>(value)
                                .ok()
                                .map(|settings| (key, settings))
                        })
                        .collect()
                })
        })
        .unwrap_or_default();

    let message_type = NotificationType::ALL
        .into_iter()
        .map(|t| {
            let settings = stored_types
                .get(t.as_str())
                .copied()
                .unwrap_or_default();
            (t, settings)
        })
        .collect();

    SubscriptionDetails {
        ignore_all_email,
        ignore_all_in_app,
        message_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_subscription_enables_every_known_type() {
        let details = default_subscription();
        assert!(!details.ignore_all_email);
        assert!(!details.ignore_all_in_app);
        assert_eq!(details.message_type.len(), NotificationType::ALL.len());
        for t in NotificationType::ALL {
            let settings = details.message_type[&t];
            assert!(settings.email);
            assert!(settings.in_app);
        }
    }

    #[test]
    fn sanitize_drops_unknown_types_and_backfills_missing_ones() {
        let stored = json!({
            "ignore_all_email": true,
            "ignore_all_in_app": false,
            "message_type": {
                "item_sold": {"email": false, "in_app": false},
                "governance_proposal_enacted": {"email": true, "in_app": true}
            }
        });

        let details = sanitize_details(stored);
        assert!(details.ignore_all_email);
        assert_eq!(details.message_type.len(), NotificationType::ALL.len());

        // 保留存储中的已知类型设置
        let item_sold = details.message_type[&NotificationType::ItemSold];
        assert!(!item_sold.email);
        assert!(!item_sold.in_app);

        // 缺失的已知类型按默认补齐
        let bid_received = details.message_type[&NotificationType::BidReceived];
        assert!(bid_received.email);
        assert!(bid_received.in_app);
    }

    #[test]
    fn sanitize_tolerates_malformed_details() {
        let details = sanitize_details(json!({"message_type": "not-an-object"}));
        assert_eq!(details, default_subscription());

        let details = sanitize_details(json!(null));
        assert_eq!(details, default_subscription());
    }
}
