use crate::error::Result;
use crate::models::notification::{NotificationRecord, NotificationType};
use crate::producers::subgraph::SubgraphClient;
use crate::producers::{Nft, NotificationGenerator, ProducerRun, PAGE_SIZE};
use crate::utils::format::format_mana;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const ROYALTIES_EARNED_QUERY: &str = r#"
    query Sales($since: BigInt!, $paginationId: ID!, $first: Int!) {
      sales(
        where: {timestamp_gte: $since, royaltiesCut_not: "0", id_gt: $paginationId}
        orderBy: id
        orderDirection: asc
        first: $first
      ) {
        id
        type
        buyer
        seller
        royaltiesCut
        royaltiesCollector
        nft {
          id
          category
          image
          metadata {
            id
            wearable {
              id
              name
              description
              rarity
            }
            emote {
              id
              name
              description
              rarity
            }
          }
          contractAddress
          tokenId
        }
        price
        txHash
        timestamp
      }
    }
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sale {
    id: String,
    royalties_cut: String,
    royalties_collector: String,
    #[serde(default)]
    nft: Option<Nft>,
    tx_hash: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct SalesResponse {
    sales: Vec<Sale>,
}

/// 二级市场成交产生版税时通知版税收款人
pub struct RoyaltiesEarnedProducer {
    subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
}

impl RoyaltiesEarnedProducer {
    pub fn new(subgraph: Arc<SubgraphClient>, marketplace_base_url: &str) -> Self {
        Self {
            subgraph,
            marketplace_base_url: marketplace_base_url.to_string(),
        }
    }

    fn map_sale(&self, sale: Sale) -> Option<NotificationRecord> {
        let Some(nft) = sale.nft else {
            warn!("Dropping sale {} without an NFT payload", sale.id);
            return None;
        };

        let name = nft.name().unwrap_or("item").to_string();
        Some(NotificationRecord {
            notification_type: NotificationType::RoyaltiesEarned,
            address: Some(sale.royalties_collector.clone()),
            event_key: sale.tx_hash,
            metadata: json!({
                "image": nft.image,
                "category": nft.category,
                "rarity": nft.rarity(),
                "link": nft.marketplace_link(&self.marketplace_base_url),
                "nftName": nft.name(),
                "title": "Royalties Earned",
                "description": format!(
                    "You earned {} MANA for this {}.",
                    format_mana(&sale.royalties_cut),
                    name
                ),
                "royaltiesCut": sale.royalties_cut,
                "royaltiesCollector": sale.royalties_collector,
                "network": "polygon"
            }),
            timestamp: sale.timestamp * 1000,
        })
    }
}

#[async_trait]
impl NotificationGenerator for RoyaltiesEarnedProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::RoyaltiesEarned
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: SalesResponse = self
                .subgraph
                .query(
                    ROYALTIES_EARNED_QUERY,
                    json!({
                        "since": since / 1000,
                        "paginationId": pagination_id,
                        "first": PAGE_SIZE,
                    }),
                )
                .await?;

            if response.sales.is_empty() {
                break;
            }

            let page_len = response.sales.len();
            for sale in response.sales {
                pagination_id = sale.id.clone();
                if let Some(record) = self.map_sale(sale) {
                    produced.push(record);
                }
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(ProducerRun {
            notification_type: NotificationType::RoyaltiesEarned,
            records: produced,
            last_run: now,
        })
    }
}
