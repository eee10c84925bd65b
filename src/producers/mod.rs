pub mod bid_accepted;
pub mod bid_received;
pub mod item_sold;
pub mod registry;
pub mod rental_ended;
pub mod rental_started;
pub mod royalties_earned;
pub mod scheduler;
pub mod subgraph;

pub use registry::ProducerRegistry;
pub use scheduler::{ProducerScheduler, ProducerState, ProducerStatus};
pub use subgraph::SubgraphClient;

use crate::error::Result;
use crate::models::notification::{NotificationRecord, NotificationType};
use async_trait::async_trait;
use serde::Deserialize;

#[cfg(test)]
use mockall::automock;

/// 每页向子图请求的行数上限
pub const PAGE_SIZE: usize = 1000;

/// 一次生产者运行的产出。
/// last_run 取运行开始时的墙钟时间而非最后一条记录的时间戳：
/// 子图可能尚未索引到刚发生的事件，用记录时间推进游标会漏事件,
/// 重叠窗口造成的重复由幂等 upsert 吸收
#[derive(Debug)]
pub struct ProducerRun {
    pub notification_type: NotificationType,
    pub records: Vec<NotificationRecord>,
    pub last_run: i64,
}

/// 事件源适配器：把一个外部事件类别翻译成规范的通知候选
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationGenerator: Send + Sync {
    fn notification_type(&self) -> NotificationType;

    /// 自 since（毫秒时间戳）起增量拉取一轮
    async fn run(&self, since: i64) -> Result<ProducerRun>;
}

// 市场子图共用的 NFT 响应形状

#[derive(Debug, Deserialize)]
pub struct ItemDetails {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rarity: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NftMetadata {
    pub id: String,
    #[serde(default)]
    pub wearable: Option<ItemDetails>,
    #[serde(default)]
    pub emote: Option<ItemDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub image: Option<String>,
    pub metadata: NftMetadata,
    pub contract_address: String,
    pub token_id: String,
}

impl Nft {
    /// 按 category 取对应的物品详情
    pub fn item(&self) -> Option<&ItemDetails> {
        match self.category.as_str() {
            "wearable" => self.metadata.wearable.as_ref(),
            "emote" => self.metadata.emote.as_ref(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.item().and_then(|item| item.name.as_deref())
    }

    pub fn rarity(&self) -> Option<&str> {
        self.item().and_then(|item| item.rarity.as_deref())
    }

    pub fn marketplace_link(&self, base_url: &str) -> String {
        format!(
            "{}/contracts/{}/tokens/{}",
            base_url, self.contract_address, self.token_id
        )
    }
}
