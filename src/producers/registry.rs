use crate::error::{AppError, Result};
use crate::models::notification::NotificationType;
use crate::producers::scheduler::{ProducerScheduler, ProducerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// 持有全部已调度的生产者。
/// 在启动时构造一次并挂到应用状态上，不使用任何全局单例
#[derive(Default)]
pub struct ProducerRegistry {
    producers: HashMap<NotificationType, Arc<ProducerScheduler>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_producer(&mut self, producer: Arc<ProducerScheduler>) -> Result<()> {
        let notification_type = producer.notification_type();
        if self.producers.contains_key(&notification_type) {
            return Err(AppError::conflict(&format!(
                "Producer for {} already exists",
                notification_type
            )));
        }

        info!("Adding producer for {}.", notification_type);
        self.producers.insert(notification_type, producer);
        Ok(())
    }

    pub fn get_producer(
        &self,
        notification_type: NotificationType,
    ) -> Result<Arc<ProducerScheduler>> {
        self.producers
            .get(&notification_type)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("Producer for {} not found", notification_type))
            })
    }

    /// 同时启动全部生产者的调度循环
    pub fn start(&self) {
        for producer in self.producers.values() {
            producer.start();
        }
        info!("Started {} producers.", self.producers.len());
    }

    pub fn statuses(&self) -> Vec<ProducerStatus> {
        let mut statuses: Vec<ProducerStatus> =
            self.producers.values().map(|p| p.status()).collect();
        statuses.sort_by_key(|s| s.notification_type.as_str());
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::MockNotificationGenerator;
    use crate::services::analytics::AnalyticsService;
    use crate::services::database::MockDb;
    use crate::services::email::{EmailRenderer, MockEmailSender};
    use crate::services::notification::NotificationService;
    use std::time::Duration;

    fn scheduler_for(notification_type: NotificationType) -> Arc<ProducerScheduler> {
        let mut generator = MockNotificationGenerator::new();
        generator
            .expect_notification_type()
            .return_const(notification_type);

        let db = Arc::new(MockDb::new());
        let notifications = NotificationService::new(
            db.clone(),
            Arc::new(EmailRenderer::new("https://inbox.rainbow-hub.io").unwrap()),
            Arc::new(MockEmailSender::new()),
            AnalyticsService::disabled("test"),
            "test".to_string(),
            false,
        );

        Arc::new(ProducerScheduler::new(
            Arc::new(generator),
            db,
            notifications,
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn rejects_duplicate_producers_for_the_same_type() {
        let mut registry = ProducerRegistry::new();
        registry
            .add_producer(scheduler_for(NotificationType::ItemSold))
            .unwrap();

        let result = registry.add_producer(scheduler_for(NotificationType::ItemSold));
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn get_producer_fails_for_unknown_types() {
        let mut registry = ProducerRegistry::new();
        registry
            .add_producer(scheduler_for(NotificationType::ItemSold))
            .unwrap();

        assert!(registry.get_producer(NotificationType::ItemSold).is_ok());
        assert!(matches!(
            registry.get_producer(NotificationType::LandRented),
            Err(AppError::NotFound(_))
        ));
    }
}
