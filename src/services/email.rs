use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::notification::{NotificationRow, NotificationType};
use crate::utils::format::format_mana;
use async_trait::async_trait;
use handlebars::{handlebars_helper, Handlebars};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::Value;
use tracing::info;

#[cfg(test)]
use mockall::automock;

/// 渲染完成、可直接投递的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub content: String,
    pub unsubscribe_all_url: String,
    pub unsubscribe_one_url: String,
}

/// 投递时附带的跟踪参数，仅用于日志与分析事件
#[derive(Debug, Clone)]
pub struct EmailCustomArgs {
    pub environment: String,
    pub tracking_id: Option<String>,
    pub email_type: Option<&'static str>,
}

/// 邮件投递契约：失败是正常的预期结果，由调用方记录日志
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, email: RenderedEmail, args: EmailCustomArgs) -> Result<()>;
}

/// SMTP 投递实现
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| AppError::Email(e.to_string()))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        let from = format!("{} <{}>", config.smtp_from_name, config.smtp_from_email)
            .parse::<Mailbox>()
            .map_err(|e| AppError::Email(e.to_string()))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(&self, email: RenderedEmail, args: EmailCustomArgs) -> Result<()> {
        info!(
            "Sending email to {} with subject \"{}\" (environment: {}, tracking_id: {})",
            email.to,
            email.subject,
            args.environment,
            args.tracking_id.as_deref().unwrap_or("-")
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(email
                .to
                .parse::<Mailbox>()
                .map_err(|e| AppError::Email(e.to_string()))?)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.content)
            .map_err(|e| AppError::Email(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Email(e.to_string()))?;

        Ok(())
    }
}

const EMAIL_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
  <body>
    <h2>{{metadata.title}}</h2>
    {{#if metadata.image}}<img src="{{metadata.image}}" alt="" width="128" />{{/if}}
    <p>{{metadata.description}}</p>
    {{#if metadata.link}}<p><a href="{{metadata.link}}">View on the marketplace</a></p>{{/if}}
    <hr />
    <p>
      <a href="{{unsubscribeOneUrl}}">Stop receiving these emails</a> &middot;
      <a href="{{unsubscribeAllUrl}}">Unsubscribe from all notifications</a>
    </p>
  </body>
</html>
"#;

fn subject_template(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::ItemSold => "You just sold {{insert metadata.nftName \"an item\"}}",
        NotificationType::BidAccepted => {
            "Your bid on {{insert metadata.nftName \"an item\"}} was accepted"
        }
        NotificationType::BidReceived => {
            "You received a bid of {{formatMana metadata.price}} MANA"
        }
        NotificationType::RoyaltiesEarned => {
            "You earned {{formatMana metadata.royaltiesCut}} MANA in royalties"
        }
        NotificationType::LandRented => "Your LAND was rented",
        NotificationType::LandRentalEnded => "A LAND rental has ended",
    }
}

handlebars_helper!(format_mana_helper: |mana: str| format_mana(mana));

handlebars_helper!(insert_helper: |value: Json, default_text: str| {
    match value.as_str() {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => default_text.to_string(),
    }
});

/// 邮件渲染器：纯函数视角，输入收件地址与通知行，输出可投递邮件
pub struct EmailRenderer {
    handlebars: Handlebars<'static>,
    service_base_url: String,
}

impl EmailRenderer {
    pub fn new(service_base_url: &str) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_helper("formatMana", Box::new(format_mana_helper));
        handlebars.register_helper("insert", Box::new(insert_helper));

        handlebars
            .register_template_string("email-layout", EMAIL_LAYOUT)
            .map_err(|e| AppError::Email(e.to_string()))?;
        for notification_type in NotificationType::ALL {
            handlebars
                .register_template_string(
                    &format!("{}.subject", notification_type),
                    subject_template(notification_type),
                )
                .map_err(|e| AppError::Email(e.to_string()))?;
        }

        Ok(Self {
            handlebars,
            service_base_url: service_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn render_email(
        &self,
        email_address: &str,
        notification: &NotificationRow,
    ) -> Result<RenderedEmail> {
        // 模板只要求 metadata 中存在 title 与 description，其余字段按类型约定
        for field in ["title", "description"] {
            if notification
                .metadata
                .get(field)
                .and_then(Value::as_str)
                .is_none()
            {
                return Err(AppError::Validation(format!(
                    "Notification metadata is missing '{}'",
                    field
                )));
            }
        }

        let address = notification.address.as_deref().unwrap_or_default();
        let unsubscribe_all_url = format!("{}/unsubscribe/{}", self.service_base_url, address);
        let unsubscribe_one_url = format!(
            "{}/unsubscribe/{}/{}",
            self.service_base_url, address, notification.notification_type
        );

        let mut data = serde_json::to_value(notification)?;
        data["unsubscribeAllUrl"] = Value::String(unsubscribe_all_url.clone());
        data["unsubscribeOneUrl"] = Value::String(unsubscribe_one_url.clone());

        let subject = self
            .handlebars
            .render(&format!("{}.subject", notification.notification_type), &data)
            .map_err(|e| AppError::Email(e.to_string()))?;
        let content = self
            .handlebars
            .render("email-layout", &data)
            .map_err(|e| AppError::Email(e.to_string()))?;

        Ok(RenderedEmail {
            to: email_address.to_string(),
            subject,
            content,
            unsubscribe_all_url,
            unsubscribe_one_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn notification(metadata: Value) -> NotificationRow {
        NotificationRow {
            id: Uuid::new_v4(),
            event_key: "tx1".to_string(),
            notification_type: NotificationType::ItemSold,
            address: Some("0x24e5f44999c151f08609f8e27b2238c773c4d020".to_string()),
            metadata,
            timestamp: 1_700_000_000_000,
            read_at: None,
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            broadcast_address: None,
            broadcast_read_at: None,
        }
    }

    #[test]
    fn renders_subject_and_content_from_metadata() {
        let renderer = EmailRenderer::new("https://inbox.rainbow-hub.io/").unwrap();
        let email = renderer
            .render_email(
                "user@example.com",
                &notification(json!({
                    "title": "Item Sold",
                    "description": "You just sold this Cool Hat.",
                    "nftName": "Cool Hat",
                    "link": "https://market.rainbow-hub.io/contracts/0x1/tokens/2"
                })),
            )
            .unwrap();

        assert_eq!(email.to, "user@example.com");
        assert_eq!(email.subject, "You just sold Cool Hat");
        assert!(email.content.contains("You just sold this Cool Hat."));
        assert!(email.content.contains("https://market.rainbow-hub.io/contracts/0x1/tokens/2"));
        assert!(email
            .unsubscribe_one_url
            .ends_with("/unsubscribe/0x24e5f44999c151f08609f8e27b2238c773c4d020/item_sold"));
    }

    #[test]
    fn falls_back_to_default_subject_text_when_name_is_missing() {
        let renderer = EmailRenderer::new("https://inbox.rainbow-hub.io").unwrap();
        let email = renderer
            .render_email(
                "user@example.com",
                &notification(json!({
                    "title": "Item Sold",
                    "description": "You just sold this item."
                })),
            )
            .unwrap();

        assert_eq!(email.subject, "You just sold an item");
    }

    #[test]
    fn rejects_notifications_without_required_metadata() {
        let renderer = EmailRenderer::new("https://inbox.rainbow-hub.io").unwrap();
        let result = renderer.render_email(
            "user@example.com",
            &notification(json!({"title": "Item Sold"})),
        );

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
