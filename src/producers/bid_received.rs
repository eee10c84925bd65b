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

const RECEIVED_BIDS_QUERY: &str = r#"
    query Bids($since: BigInt!, $paginationId: ID!, $first: Int!) {
      bids(
        where: {createdAt_gte: $since, id_gt: $paginationId}
        orderBy: id
        orderDirection: asc
        first: $first
      ) {
        id
        bidder
        seller
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
        createdAt
        price
        blockchainId
      }
    }
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bid {
    id: String,
    seller: String,
    #[serde(default)]
    nft: Option<Nft>,
    created_at: i64,
    price: String,
    blockchain_id: String,
}

#[derive(Debug, Deserialize)]
struct BidsResponse {
    bids: Vec<Bid>,
}

/// 卖家收到新出价时通知卖家
pub struct BidReceivedProducer {
    subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
}

impl BidReceivedProducer {
    pub fn new(subgraph: Arc<SubgraphClient>, marketplace_base_url: &str) -> Self {
        Self {
            subgraph,
            marketplace_base_url: marketplace_base_url.to_string(),
        }
    }

    fn map_bid(&self, bid: Bid) -> Option<NotificationRecord> {
        let Some(nft) = bid.nft else {
            warn!("Dropping bid {} without an NFT payload", bid.id);
            return None;
        };

        let name = nft.name().unwrap_or("item").to_string();
        Some(NotificationRecord {
            notification_type: NotificationType::BidReceived,
            address: Some(bid.seller.clone()),
            event_key: bid.blockchain_id,
            metadata: json!({
                "image": nft.image,
                "seller": bid.seller,
                "category": nft.category,
                "rarity": nft.rarity(),
                "link": format!(
                    "{}/account?assetType=nft&section=bids",
                    self.marketplace_base_url
                ),
                "nftName": nft.name(),
                "price": bid.price,
                "title": "Bid Received",
                "description": format!(
                    "You received a bid of {} MANA for this {}.",
                    format_mana(&bid.price),
                    name
                ),
                "network": "polygon"
            }),
            timestamp: bid.created_at * 1000,
        })
    }
}

#[async_trait]
impl NotificationGenerator for BidReceivedProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::BidReceived
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: BidsResponse = self
                .subgraph
                .query(
                    RECEIVED_BIDS_QUERY,
                    json!({
                        "since": since / 1000,
                        "paginationId": pagination_id,
                        "first": PAGE_SIZE,
                    }),
                )
                .await?;

            if response.bids.is_empty() {
                break;
            }

            let page_len = response.bids.len();
            for bid in response.bids {
                pagination_id = bid.id.clone();
                if let Some(record) = self.map_bid(bid) {
                    produced.push(record);
                }
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(ProducerRun {
            notification_type: NotificationType::BidReceived,
            records: produced,
            last_run: now,
        })
    }
}
