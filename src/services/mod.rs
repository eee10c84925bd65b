pub mod analytics;
pub mod database;
pub mod email;
pub mod notification;
pub mod subscription;

// 重新导出常用类型
pub use analytics::AnalyticsService;
pub use database::{Database, Db};
pub use email::{EmailRenderer, EmailSender, SmtpEmailSender};
pub use notification::NotificationService;
pub use subscription::SubscriptionService;
