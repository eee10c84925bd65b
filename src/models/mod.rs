pub mod notification;
pub mod subscription;

pub use notification::{NotificationRecord, NotificationRow, NotificationType, UpsertOutcome};
pub use subscription::{NotificationChannelSettings, Subscription, SubscriptionDetails};
