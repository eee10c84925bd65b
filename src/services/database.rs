use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::notification::{NotificationRecord, NotificationRow, NotificationType, UpsertOutcome};
use crate::models::subscription::{
    default_subscription, sanitize_details, Subscription, SubscriptionDetails,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// 存储契约：通知、广播已读、订阅与游标四张表的全部操作
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Db: Send + Sync {
    async fn find_subscription(&self, address: String) -> Result<Subscription>;
    async fn find_subscriptions(&self, addresses: Vec<String>) -> Result<Vec<Subscription>>;
    async fn find_notification(&self, id: Uuid) -> Result<Option<NotificationRow>>;
    async fn find_notifications(
        &self,
        users: Vec<String>,
        only_unread: bool,
        from: i64,
        limit: i64,
    ) -> Result<Vec<NotificationRow>>;
    async fn mark_notifications_as_read(
        &self,
        address: String,
        notification_ids: Vec<Uuid>,
    ) -> Result<u64>;
    async fn save_subscription_details(
        &self,
        address: String,
        details: SubscriptionDetails,
    ) -> Result<()>;
    async fn save_subscription_email(&self, address: String, email: Option<String>) -> Result<()>;
    async fn fetch_cursor(&self, notification_type: NotificationType) -> Result<i64>;
    async fn update_cursor(&self, notification_type: NotificationType, timestamp: i64) -> Result<()>;
    async fn upsert_notifications(
        &self,
        records: Vec<NotificationRecord>,
    ) -> Result<Vec<UpsertOutcome>>;
}

/// 数据库服务
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let pool = PgPoolOptions::new()
            .max_connections(config.database_pool_size)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to verify database connection: {}", e);
                Err(AppError::Database(e))
            }
        }
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, event_key, type, address, metadata, timestamp, read_at, created_at, updated_at";

fn notification_from_row(row: &PgRow) -> Result<NotificationRow> {
    let notification_type: String = row.try_get("type")?;

    Ok(NotificationRow {
        id: row.try_get("id")?,
        event_key: row.try_get("event_key")?,
        notification_type: notification_type.parse().map_err(AppError::Parse)?,
        address: row.try_get("address")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("timestamp")?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        broadcast_address: row.try_get("broadcast_address").ok().flatten(),
        broadcast_read_at: row.try_get("broadcast_read_at").ok().flatten(),
    })
}

#[async_trait]
impl Db for Database {
    async fn find_subscription(&self, address: String) -> Result<Subscription> {
        self.find_subscriptions(vec![address])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::internal("Subscription lookup returned no rows"))
    }

    async fn find_subscriptions(&self, addresses: Vec<String>) -> Result<Vec<Subscription>> {
        let lowercased: Vec<String> = addresses.iter().map(|a| a.to_lowercase()).collect();

        let rows = sqlx::query(
            r#"
            SELECT address, email, details, created_at, updated_at
            FROM subscriptions
            WHERE address = ANY ($1)
            "#,
        )
        .bind(&lowercased)
        .fetch_all(&self.pool)
        .await?;

        let mut by_address: HashMap<String, Subscription> = HashMap::new();
        for row in rows {
            let address: String = row.try_get("address")?;
            let details: serde_json::Value = row.try_get("details")?;
            by_address.insert(
                address.clone(),
                Subscription {
                    address,
                    email: row.try_get("email")?,
                    // 读取时做自愈迁移，存储中的类型集合可能落后于代码
                    details: sanitize_details(details),
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                },
            );
        }

        let now = Utc::now().timestamp_millis();
        Ok(lowercased
            .into_iter()
            .map(|address| {
                by_address
                    .remove(&address)
                    .unwrap_or_else(|| Subscription::default_for(&address, now))
            })
            .collect())
    }

    async fn find_notification(&self, id: Uuid) -> Result<Option<NotificationRow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn find_notifications(
        &self,
        users: Vec<String>,
        only_unread: bool,
        from: i64,
        limit: i64,
    ) -> Result<Vec<NotificationRow>> {
        let lowercased: Vec<String> = users.iter().map(|u| u.to_lowercase()).collect();

        // 广播行按查询中的收件人各自的 broadcast_read 标记联表，
        // 其他用户的已读标记不影响当前用户的未读状态
        let rows = sqlx::query(
            r#"
            SELECT n.id,
                   n.event_key,
                   n.type,
                   n.address,
                   n.metadata,
                   n.timestamp,
                   n.read_at,
                   n.created_at,
                   n.updated_at,
                   br.address AS broadcast_address,
                   br.read_at AS broadcast_read_at
            FROM notifications n
            LEFT JOIN broadcast_read br
                   ON n.id = br.notification_id AND br.address = ANY ($1)
            WHERE (n.address IS NULL OR n.address = ANY ($1))
              AND n.timestamp >= $2
              AND ($3::bool = FALSE
                   OR (n.address IS NOT NULL AND n.read_at IS NULL)
                   OR (n.address IS NULL AND br.read_at IS NULL))
            ORDER BY n.timestamp DESC
            LIMIT $4
            "#,
        )
        .bind(&lowercased)
        .bind(from)
        .bind(only_unread)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notifications_as_read(
        &self,
        address: String,
        notification_ids: Vec<Uuid>,
    ) -> Result<u64> {
        let read_at = Utc::now().timestamp_millis();
        let address = address.to_lowercase();

        let updated = sqlx::query(
            r#"
            UPDATE notifications
            SET    read_at    = $1,
                   updated_at = $1
            WHERE  read_at IS NULL
              AND  address = $2
              AND  id = ANY ($3)
            RETURNING id
            "#,
        )
        .bind(read_at)
        .bind(&address)
        .bind(&notification_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut count = updated.len() as u64;

        let addressed: HashSet<Uuid> = updated
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<std::result::Result<_, _>>()?;
        let potential_broadcast: Vec<Uuid> = notification_ids
            .into_iter()
            .filter(|id| !addressed.contains(id))
            .collect();

        if !potential_broadcast.is_empty() {
            // 仅对确实是广播行的 id 生成标记，重复标记由主键约束吸收
            let result = sqlx::query(
                r#"
                INSERT INTO broadcast_read (notification_id, address, read_at)
                  SELECT id, $1, $2
                  FROM   notifications
                  WHERE  id = ANY ($3)
                    AND  address IS NULL
                ON CONFLICT (notification_id, address) DO NOTHING
                "#,
            )
            .bind(&address)
            .bind(read_at)
            .bind(&potential_broadcast)
            .execute(&self.pool)
            .await?;

            count += result.rows_affected();
        }

        Ok(count)
    }

    async fn save_subscription_details(
        &self,
        address: String,
        details: SubscriptionDetails,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (address, details, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (address) DO UPDATE
                  SET details = $2,
                      updated_at = $3
            "#,
        )
        .bind(address.to_lowercase())
        .bind(serde_json::to_value(&details)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_subscription_email(&self, address: String, email: Option<String>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (address, email, details, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (address) DO UPDATE
                  SET email = $2,
                      updated_at = $4
            "#,
        )
        .bind(address.to_lowercase())
        .bind(email)
        .bind(serde_json::to_value(default_subscription())?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_cursor(&self, notification_type: NotificationType) -> Result<i64> {
        let row = sqlx::query("SELECT last_successful_run_at FROM cursors WHERE id = $1")
            .bind(notification_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let last: Option<i64> = row.try_get("last_successful_run_at")?;
                // 行存在但从未成功运行过的情况同样视为"从现在开始"
                Ok(last.unwrap_or_else(|| Utc::now().timestamp_millis()))
            }
            None => Ok(Utc::now().timestamp_millis()),
        }
    }

    async fn update_cursor(&self, notification_type: NotificationType, timestamp: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO cursors (id, last_successful_run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO UPDATE
            SET last_successful_run_at = $2,
                updated_at             = $3
            "#,
        )
        .bind(notification_type.as_str())
        .bind(timestamp)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_notifications(
        &self,
        records: Vec<NotificationRecord>,
    ) -> Result<Vec<UpsertOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let now = Utc::now().timestamp_millis();
            let address = record.address.as_ref().map(|a| a.to_lowercase());

            // 先尝试按业务键插入；没有返回行说明键已存在，转为更新。
            // 两条语句各自原子，因此并发的重叠轮询最多有一次被判为 Inserted。
            let inserted = sqlx::query(&format!(
                r#"
                INSERT INTO notifications (event_key, type, address, metadata, timestamp, read_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, NULL, $6, $6)
                ON CONFLICT (event_key, type, address) DO NOTHING
                RETURNING {}
                "#,
                NOTIFICATION_COLUMNS
            ))
            .bind(&record.event_key)
            .bind(record.notification_type.as_str())
            .bind(&address)
            .bind(&record.metadata)
            .bind(record.timestamp)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            match inserted {
                Some(row) => outcomes.push(UpsertOutcome::Inserted(notification_from_row(&row)?)),
                None => {
                    let row = sqlx::query(&format!(
                        r#"
                        UPDATE notifications
                        SET metadata   = $1,
                            timestamp  = $2,
                            updated_at = $3
                        WHERE event_key = $4
                          AND type = $5
                          AND address IS NOT DISTINCT FROM $6
                        RETURNING {}
                        "#,
                        NOTIFICATION_COLUMNS
                    ))
                    .bind(&record.metadata)
                    .bind(record.timestamp)
                    .bind(now)
                    .bind(&record.event_key)
                    .bind(record.notification_type.as_str())
                    .bind(&address)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| {
                        AppError::internal("Notification row disappeared during upsert")
                    })?;

                    outcomes.push(UpsertOutcome::Updated(notification_from_row(&row)?));
                }
            }
        }

        Ok(outcomes)
    }
}
