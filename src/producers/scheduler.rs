use crate::error::Result;
use crate::models::notification::NotificationType;
use crate::producers::NotificationGenerator;
use crate::services::database::Db;
use crate::services::notification::NotificationService;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    Idle,
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerStatus {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub state: ProducerState,
    pub last_successful_run_at: Option<i64>,
}

/// 包装一个生产者：周期执行、游标读写与失败隔离。
/// 游标只在一轮完整成功之后推进，失败的窗口由下一个周期原样重试
pub struct ProducerScheduler {
    generator: Arc<dyn NotificationGenerator>,
    db: Arc<dyn Db>,
    notifications: NotificationService,
    poll_interval: Duration,
    cursor: Mutex<Option<i64>>,
    state: Mutex<ProducerState>,
}

impl ProducerScheduler {
    pub fn new(
        generator: Arc<dyn NotificationGenerator>,
        db: Arc<dyn Db>,
        notifications: NotificationService,
        poll_interval: Duration,
    ) -> Self {
        Self {
            generator,
            db,
            notifications,
            poll_interval,
            cursor: Mutex::new(None),
            state: Mutex::new(ProducerState::Idle),
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        self.generator.notification_type()
    }

    pub fn start(self: &Arc<Self>) {
        info!("Scheduling producer for {}.", self.notification_type());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.poll_interval);
            loop {
                interval.tick().await;
                scheduler.tick().await;
            }
        });
    }

    /// 单个调度周期。任何失败都不推进游标
    pub async fn tick(&self) {
        let since = {
            let cached = *self.cursor.lock();
            match cached {
                Some(cursor) => cursor,
                None => match self.db.fetch_cursor(self.notification_type()).await {
                    Ok(cursor) => {
                        *self.cursor.lock() = Some(cursor);
                        cursor
                    }
                    Err(e) => {
                        error!(
                            "Couldn't fetch cursor for {}: {}.",
                            self.notification_type(),
                            e
                        );
                        *self.state.lock() = ProducerState::Failed;
                        return;
                    }
                },
            }
        };

        *self.state.lock() = ProducerState::Running;
        match self.run_producer(since).await {
            Ok(last_run) => {
                *self.cursor.lock() = Some(last_run);
                *self.state.lock() = ProducerState::Idle;
            }
            Err(e) => {
                error!(
                    "Couldn't run producer {}: {}.",
                    self.notification_type(),
                    e
                );
                // Failed 保留到下一个周期开始，便于状态端点观察
                *self.state.lock() = ProducerState::Failed;
            }
        }
    }

    /// 运维入口：用显式水位执行一轮，绕过且不修改缓存的游标
    pub async fn run_since(&self, since: i64) -> Result<()> {
        self.run_producer(since).await.map(|_| ())
    }

    async fn run_producer(&self, since: i64) -> Result<i64> {
        info!(
            "Checking {} for updates since {}.",
            self.notification_type(),
            since
        );

        let produced = self.generator.run(since).await?;
        let count = produced.records.len();
        self.notifications.save_notifications(produced.records).await?;
        self.db
            .update_cursor(self.notification_type(), produced.last_run)
            .await?;

        info!("Created {} new notifications.", count);
        Ok(produced.last_run)
    }

    pub fn status(&self) -> ProducerStatus {
        ProducerStatus {
            notification_type: self.notification_type(),
            state: *self.state.lock(),
            last_successful_run_at: *self.cursor.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::producers::{MockNotificationGenerator, ProducerRun};
    use crate::services::analytics::AnalyticsService;
    use crate::services::database::MockDb;
    use crate::services::email::{EmailRenderer, MockEmailSender};
    use mockall::Sequence;

    fn notification_service(db: Arc<MockDb>) -> NotificationService {
        NotificationService::new(
            db,
            Arc::new(EmailRenderer::new("https://inbox.rainbow-hub.io").unwrap()),
            Arc::new(MockEmailSender::new()),
            AnalyticsService::disabled("test"),
            "test".to_string(),
            false,
        )
    }

    fn scheduler(
        generator: MockNotificationGenerator,
        db: MockDb,
    ) -> ProducerScheduler {
        let db = Arc::new(db);
        ProducerScheduler::new(
            Arc::new(generator),
            db.clone(),
            notification_service(db),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn cursor_is_not_advanced_when_a_run_fails() {
        let mut db = MockDb::new();
        db.expect_fetch_cursor().times(1).returning(|_| Ok(1_000));
        db.expect_update_cursor()
            .times(1)
            .withf(|_, timestamp| *timestamp == 2_000)
            .returning(|_, _| Ok(()));

        let mut generator = MockNotificationGenerator::new();
        generator
            .expect_notification_type()
            .return_const(NotificationType::ItemSold);
        let mut seq = Sequence::new();
        generator
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AppError::ExternalService("subgraph is down".to_string())));
        // 失败后的下一轮必须从失败前的游标重试同一窗口
        generator
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|since| *since == 1_000)
            .returning(|_| {
                Ok(ProducerRun {
                    notification_type: NotificationType::ItemSold,
                    records: vec![],
                    last_run: 2_000,
                })
            });

        let scheduler = scheduler(generator, db);

        scheduler.tick().await;
        assert_eq!(scheduler.status().state, ProducerState::Failed);
        assert_eq!(scheduler.status().last_successful_run_at, Some(1_000));

        scheduler.tick().await;
        assert_eq!(scheduler.status().state, ProducerState::Idle);
        assert_eq!(scheduler.status().last_successful_run_at, Some(2_000));
    }

    #[tokio::test]
    async fn manual_run_does_not_touch_the_cached_cursor() {
        let mut db = MockDb::new();
        db.expect_fetch_cursor().times(0);
        db.expect_update_cursor()
            .times(1)
            .withf(|_, timestamp| *timestamp == 3_000)
            .returning(|_, _| Ok(()));

        let mut generator = MockNotificationGenerator::new();
        generator
            .expect_notification_type()
            .return_const(NotificationType::BidReceived);
        generator
            .expect_run()
            .times(1)
            .withf(|since| *since == 555)
            .returning(|_| {
                Ok(ProducerRun {
                    notification_type: NotificationType::BidReceived,
                    records: vec![],
                    last_run: 3_000,
                })
            });

        let scheduler = scheduler(generator, db);
        scheduler.run_since(555).await.unwrap();

        // 存储游标已更新，但调度自身的缓存游标不受影响
        assert_eq!(scheduler.status().last_successful_run_at, None);
    }
}
