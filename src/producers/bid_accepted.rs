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

const ACCEPTED_BIDS_QUERY: &str = r#"
    query Bids($since: BigInt!, $paginationId: ID!, $first: Int!) {
      bids(
        where: {updatedAt_gte: $since, id_gt: $paginationId, status: sold}
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
        updatedAt
        price
        blockchainId
      }
    }
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bid {
    id: String,
    bidder: String,
    seller: String,
    #[serde(default)]
    nft: Option<Nft>,
    updated_at: i64,
    price: String,
    blockchain_id: String,
}

#[derive(Debug, Deserialize)]
struct BidsResponse {
    bids: Vec<Bid>,
}

pub struct BidAcceptedProducer {
    subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
}

impl BidAcceptedProducer {
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
            notification_type: NotificationType::BidAccepted,
            address: Some(bid.bidder),
            event_key: bid.blockchain_id,
            metadata: json!({
                "image": nft.image,
                "seller": bid.seller,
                "category": nft.category,
                "rarity": nft.rarity(),
                "link": nft.marketplace_link(&self.marketplace_base_url),
                "nftName": nft.name(),
                "price": bid.price,
                "title": "Bid Accepted",
                "description": format!(
                    "Your bid for {} MANA for this {} was accepted.",
                    format_mana(&bid.price),
                    name
                ),
                "network": "polygon"
            }),
            timestamp: bid.updated_at * 1000,
        })
    }
}

#[async_trait]
impl NotificationGenerator for BidAcceptedProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::BidAccepted
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: BidsResponse = self
                .subgraph
                .query(
                    ACCEPTED_BIDS_QUERY,
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
            notification_type: NotificationType::BidAccepted,
            records: produced,
            last_run: now,
        })
    }
}
