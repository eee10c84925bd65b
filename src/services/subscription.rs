use crate::error::Result;
use crate::models::subscription::{Subscription, SubscriptionDetails};
use crate::services::analytics::AnalyticsService;
use crate::services::database::Db;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SubscriptionService {
    db: Arc<dyn Db>,
    analytics: AnalyticsService,
}

impl SubscriptionService {
    pub fn new(db: Arc<dyn Db>, analytics: AnalyticsService) -> Self {
        Self { db, analytics }
    }

    pub async fn find_subscriptions_for_addresses(
        &self,
        addresses: Vec<String>,
    ) -> Result<Vec<Subscription>> {
        info!("Finding subscriptions for addresses {}", addresses.join(", "));
        self.db.find_subscriptions(addresses).await
    }

    pub async fn get_subscription(&self, address: &str) -> Result<Subscription> {
        self.db.find_subscription(address.to_string()).await
    }

    pub async fn save_details(&self, address: &str, details: SubscriptionDetails) -> Result<()> {
        self.db
            .save_subscription_details(address.to_string(), details)
            .await?;

        self.analytics.send_event(
            "subscription_changed",
            json!({ "address": address.to_lowercase() }),
        );
        Ok(())
    }

    pub async fn save_email(&self, address: &str, email: Option<String>) -> Result<()> {
        self.db
            .save_subscription_email(address.to_string(), email)
            .await?;

        self.analytics.send_event(
            "subscription_changed",
            json!({ "address": address.to_lowercase(), "field": "email" }),
        );
        Ok(())
    }
}
