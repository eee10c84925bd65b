use crate::{
    config::Config,
    producers::ProducerRegistry,
    services::{NotificationService, SubscriptionService},
};
use std::sync::Arc;

/// 应用程序的共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 通知服务（upsert、收件箱查询、已读、邮件扇出）
    pub notification_service: NotificationService,

    /// 订阅服务
    pub subscription_service: SubscriptionService,

    /// 生产者注册表，启动时构造一次
    pub producer_registry: Arc<ProducerRegistry>,
}
