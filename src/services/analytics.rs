use crate::config::Config;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct AnalyticsInner {
    client: reqwest::Client,
    url: String,
    token: String,
}

/// 分析事件接收端。未配置时退化为 no-op，对管线行为没有任何影响
#[derive(Clone)]
pub struct AnalyticsService {
    inner: Option<Arc<AnalyticsInner>>,
    environment: String,
}

impl AnalyticsService {
    pub fn new(config: &Config) -> Self {
        let (url, token) = match (&config.analytics_api_url, &config.analytics_api_token) {
            (Some(url), Some(token)) => (url.clone(), token.clone()),
            _ => {
                info!("Analytics sink not configured, events will be dropped");
                return Self::disabled(&config.environment);
            }
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build analytics client, events will be dropped: {}", e);
                return Self::disabled(&config.environment);
            }
        };

        info!("Creating analytics events client");
        Self {
            inner: Some(Arc::new(AnalyticsInner { client, url, token })),
            environment: config.environment.clone(),
        }
    }

    pub fn disabled(environment: &str) -> Self {
        Self {
            inner: None,
            environment: environment.to_string(),
        }
    }

    /// 发送一个事件。即发即忘：绝不阻塞调用方，失败只记录日志
    pub fn send_event(&self, event: &'static str, body: serde_json::Value) {
        let Some(inner) = self.inner.clone() else {
            debug!("Dropping analytics event {}", event);
            return;
        };

        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("env".to_string(), json!(self.environment));
        }
        let payload = json!({
            "context": "notification_server",
            "event": event,
            "body": body
        });

        tokio::spawn(async move {
            let result = inner
                .client
                .post(&inner.url)
                .header("x-token", &inner.token)
                .json(&payload)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(e) = result {
                warn!("Failed to send analytics event {}: {}", event, e);
            }
        });
    }
}
