use crate::error::Result;
use crate::models::notification::{NotificationRecord, NotificationRow, UpsertOutcome};
use crate::models::subscription::Subscription;
use crate::services::analytics::AnalyticsService;
use crate::services::database::Db;
use crate::services::email::{EmailCustomArgs, EmailRenderer, EmailSender};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 一次批量 upsert 的汇总结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<dyn Db>,
    email_renderer: Arc<EmailRenderer>,
    email_sender: Arc<dyn EmailSender>,
    analytics: AnalyticsService,
    environment: String,
    email_enabled: bool,
}

impl NotificationService {
    pub fn new(
        db: Arc<dyn Db>,
        email_renderer: Arc<EmailRenderer>,
        email_sender: Arc<dyn EmailSender>,
        analytics: AnalyticsService,
        environment: String,
        email_enabled: bool,
    ) -> Self {
        Self {
            db,
            email_renderer,
            email_sender,
            analytics,
            environment,
            email_enabled,
        }
    }

    /// 持久化一批通知候选并触发邮件扇出。
    /// 只有真正新插入的行才会进入扇出；更新已有行绝不重发邮件。
    pub async fn save_notifications(
        &self,
        records: Vec<NotificationRecord>,
    ) -> Result<UpsertSummary> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let outcomes = self.db.upsert_notifications(records).await?;
        let (inserted, updated): (Vec<UpsertOutcome>, Vec<UpsertOutcome>) =
            outcomes.into_iter().partition(UpsertOutcome::is_inserted);
        let inserted: Vec<NotificationRow> =
            inserted.into_iter().map(|o| o.row().clone()).collect();

        let summary = UpsertSummary {
            inserted: inserted.len(),
            updated: updated.len(),
        };
        info!(
            "Inserted {} new notifications and updated {} existing ones.",
            summary.inserted, summary.updated
        );

        if !inserted.is_empty() && self.email_enabled {
            // 邮件投递与存储路径解耦：失败只能通过日志观察到，
            // 不会反映到调用方的返回值里
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.dispatch_emails(inserted).await {
                    warn!("Failed to send emails: {}", e);
                }
            });
        }

        Ok(summary)
    }

    pub async fn find_notifications(
        &self,
        users: Vec<String>,
        only_unread: bool,
        from: i64,
        limit: i64,
    ) -> Result<Vec<NotificationRow>> {
        self.db.find_notifications(users, only_unread, from, limit).await
    }

    pub async fn find_notification(&self, id: Uuid) -> Result<Option<NotificationRow>> {
        self.db.find_notification(id).await
    }

    pub async fn mark_notifications_as_read(
        &self,
        address: String,
        notification_ids: Vec<Uuid>,
    ) -> Result<u64> {
        info!(
            "Marking notifications for user {} as read: {:?}",
            address, notification_ids
        );
        self.db
            .mark_notifications_as_read(address, notification_ids)
            .await
    }

    /// 按订阅偏好过滤后逐条投递。单条失败只影响自己
    pub async fn dispatch_emails(&self, inserted: Vec<NotificationRow>) -> Result<()> {
        let mut addresses: Vec<String> = inserted
            .iter()
            .filter_map(|n| n.address.as_ref().map(|a| a.to_lowercase()))
            .collect();
        addresses.sort();
        addresses.dedup();

        if addresses.is_empty() {
            return Ok(());
        }

        let subscriptions = self.db.find_subscriptions(addresses).await?;
        let by_address: HashMap<String, Subscription> = subscriptions
            .into_iter()
            .map(|s| (s.address.clone(), s))
            .collect();

        for notification in inserted {
            let Some(address) = notification.address.clone() else {
                debug!(
                    "Skipping email for broadcast notification {} ({})",
                    notification.id, notification.notification_type
                );
                continue;
            };

            let email = match Self::email_recipient(
                by_address.get(&address.to_lowercase()),
                &notification,
            ) {
                Ok(email) => email.to_string(),
                Err(reason) => {
                    info!(
                        "Skipping sending email for {} as {}",
                        address, reason
                    );
                    continue;
                }
            };

            let args = EmailCustomArgs {
                environment: self.environment.clone(),
                tracking_id: Some(notification.id.to_string()),
                email_type: Some("notification"),
            };

            let result = async {
                let rendered = self.email_renderer.render_email(&email, &notification)?;
                self.email_sender.send_email(rendered, args).await
            }
            .await;

            match result {
                Ok(()) => {
                    self.analytics.send_event(
                        "email_sent",
                        json!({
                            "address": address.to_lowercase(),
                            "type": notification.notification_type,
                            "tracking_id": notification.id,
                        }),
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to send email for notification: type={} address={} event_key={}. Error: {}",
                        notification.notification_type, address, notification.event_key, e
                    );
                }
            }
        }

        Ok(())
    }

    /// 订阅过滤规则；返回 Err 时附带跳过原因
    fn email_recipient<'a>(
        subscription: Option<&'a Subscription>,
        notification: &NotificationRow,
    ) -> std::result::Result<&'a str, &'static str> {
        let subscription = subscription.ok_or("no subscription is on file")?;
        let email = subscription
            .email
            .as_deref()
            .ok_or("no email address is on file")?;

        if subscription.details.ignore_all_email {
            return Err("all email notifications are ignored");
        }

        let enabled = subscription
            .details
            .message_type
            .get(&notification.notification_type)
            .map(|settings| settings.email)
            .unwrap_or(false);
        if !enabled {
            return Err("email notifications for this type are ignored");
        }

        Ok(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NotificationType;
    use crate::models::subscription::{
        default_subscription, NotificationChannelSettings, Subscription,
    };
    use crate::services::database::MockDb;
    use crate::services::email::MockEmailSender;
    use mockall::predicate::always;

    fn row(notification_type: NotificationType, address: Option<&str>) -> NotificationRow {
        NotificationRow {
            id: Uuid::new_v4(),
            event_key: "tx1".to_string(),
            notification_type,
            address: address.map(str::to_string),
            metadata: json!({
                "title": "Item Sold",
                "description": "You just sold this Cool Hat."
            }),
            timestamp: 1_700_000_000_000,
            read_at: None,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            broadcast_address: None,
            broadcast_read_at: None,
        }
    }

    fn subscription(address: &str, email: Option<&str>) -> Subscription {
        Subscription {
            address: address.to_string(),
            email: email.map(str::to_string),
            details: default_subscription(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn service(db: MockDb, sender: MockEmailSender) -> NotificationService {
        NotificationService::new(
            Arc::new(db),
            Arc::new(EmailRenderer::new("https://inbox.rainbow-hub.io").unwrap()),
            Arc::new(sender),
            AnalyticsService::disabled("test"),
            "test".to_string(),
            true,
        )
    }

    #[tokio::test]
    async fn save_notifications_is_a_no_op_on_empty_input() {
        let mut db = MockDb::new();
        db.expect_upsert_notifications().times(0);

        let summary = service(db, MockEmailSender::new())
            .save_notifications(vec![])
            .await
            .unwrap();
        assert_eq!(summary, UpsertSummary::default());
    }

    #[tokio::test]
    async fn save_notifications_reports_inserted_and_updated_counts() {
        let mut db = MockDb::new();
        let inserted = row(NotificationType::ItemSold, Some("0xaa"));
        let updated = row(NotificationType::ItemSold, Some("0xbb"));
        db.expect_upsert_notifications().times(1).return_once(move |_| {
            Ok(vec![
                UpsertOutcome::Inserted(inserted),
                UpsertOutcome::Updated(updated),
            ])
        });
        // 扇出任务会在后台查询订阅
        db.expect_find_subscriptions()
            .returning(|addresses| Ok(addresses.iter().map(|a| subscription(a, None)).collect()));

        let record = NotificationRecord {
            notification_type: NotificationType::ItemSold,
            address: Some("0xAA".to_string()),
            event_key: "tx1".to_string(),
            metadata: json!({}),
            timestamp: 1,
        };
        let summary = service(db, MockEmailSender::new())
            .save_notifications(vec![record])
            .await
            .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn dispatch_sends_email_only_when_subscription_allows_it() {
        let allowed = "0x1111111111111111111111111111111111111111";
        let ignoring_all = "0x2222222222222222222222222222222222222222";
        let type_disabled = "0x3333333333333333333333333333333333333333";
        let no_email = "0x4444444444444444444444444444444444444444";

        let mut db = MockDb::new();
        db.expect_find_subscriptions().times(1).returning(move |_| {
            let mut ignoring = subscription(ignoring_all, Some("ignoring@example.com"));
            ignoring.details.ignore_all_email = true;

            let mut per_type = subscription(type_disabled, Some("muted@example.com"));
            per_type.details.message_type.insert(
                NotificationType::ItemSold,
                NotificationChannelSettings {
                    email: false,
                    in_app: true,
                },
            );

            Ok(vec![
                subscription(allowed, Some("allowed@example.com")),
                ignoring,
                per_type,
                subscription(no_email, None),
            ])
        });

        let mut sender = MockEmailSender::new();
        sender
            .expect_send_email()
            .with(always(), always())
            .times(1)
            .returning(|email, _| {
                assert_eq!(email.to, "allowed@example.com");
                Ok(())
            });

        let inserted = vec![
            row(NotificationType::ItemSold, Some(allowed)),
            row(NotificationType::ItemSold, Some(ignoring_all)),
            row(NotificationType::ItemSold, Some(type_disabled)),
            row(NotificationType::ItemSold, Some(no_email)),
            row(NotificationType::ItemSold, None),
        ];

        service(db, sender).dispatch_emails(inserted).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_isolates_per_item_failures() {
        let first = "0x1111111111111111111111111111111111111111";
        let second = "0x2222222222222222222222222222222222222222";

        let mut db = MockDb::new();
        db.expect_find_subscriptions().times(1).returning(move |_| {
            Ok(vec![
                subscription(first, Some("first@example.com")),
                subscription(second, Some("second@example.com")),
            ])
        });

        let mut sender = MockEmailSender::new();
        sender
            .expect_send_email()
            .times(2)
            .returning(|email, _| {
                if email.to == "first@example.com" {
                    Err(crate::error::AppError::Email("smtp unreachable".to_string()))
                } else {
                    Ok(())
                }
            });

        let inserted = vec![
            row(NotificationType::ItemSold, Some(first)),
            row(NotificationType::ItemSold, Some(second)),
        ];

        // 第一条投递失败不得影响第二条，也不得让整体返回错误
        service(db, sender).dispatch_emails(inserted).await.unwrap();
    }

    #[test]
    fn email_recipient_requires_a_subscription_with_email() {
        let notification = row(NotificationType::ItemSold, Some("0xaa"));

        assert!(NotificationService::email_recipient(None, &notification).is_err());
        assert!(NotificationService::email_recipient(
            Some(&subscription("0xaa", None)),
            &notification
        )
        .is_err());
        assert_eq!(
            NotificationService::email_recipient(
                Some(&subscription("0xaa", Some("a@example.com"))),
                &notification
            ),
            Ok("a@example.com")
        );
    }
}
