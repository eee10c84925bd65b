use crate::error::Result;
use crate::models::notification::{NotificationRecord, NotificationType};
use crate::producers::subgraph::SubgraphClient;
use crate::producers::{Nft, NotificationGenerator, ProducerRun, PAGE_SIZE};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const SOLD_ITEMS_QUERY: &str = r#"
    query Sales($since: BigInt!, $paginationId: ID!, $first: Int!) {
      sales(
        where: {timestamp_gte: $since, id_gt: $paginationId}
        orderBy: id
        orderDirection: asc
        first: $first
      ) {
        id
        type
        buyer
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
    seller: String,
    #[serde(default)]
    nft: Option<Nft>,
    tx_hash: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct SalesResponse {
    sales: Vec<Sale>,
}

pub struct ItemSoldProducer {
    subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
}

impl ItemSoldProducer {
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
            notification_type: NotificationType::ItemSold,
            address: Some(sale.seller.clone()),
            event_key: sale.tx_hash,
            metadata: json!({
                "image": nft.image,
                "seller": sale.seller,
                "category": nft.category,
                "rarity": nft.rarity(),
                "link": nft.marketplace_link(&self.marketplace_base_url),
                "nftName": nft.name(),
                "title": "Item Sold",
                "description": format!("You just sold this {}.", name),
                "network": "polygon"
            }),
            timestamp: sale.timestamp * 1000,
        })
    }
}

#[async_trait]
impl NotificationGenerator for ItemSoldProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::ItemSold
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: SalesResponse = self
                .subgraph
                .query(
                    SOLD_ITEMS_QUERY,
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
            notification_type: NotificationType::ItemSold,
            records: produced,
            last_run: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sale_json(index: usize) -> Value {
        json!({
            "id": format!("sale-{:05}", index),
            "type": "order",
            "buyer": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "seller": "0xAAaaaAaaAaAaAAaaAAAaaaAAaaaAaaaaAaAAAAaA",
            "nft": {
                "id": format!("nft-{}", index),
                "category": "wearable",
                "image": "https://peer.example.org/image.png",
                "metadata": {
                    "id": format!("meta-{}", index),
                    "wearable": {
                        "id": format!("wearable-{}", index),
                        "name": "Cool Hat",
                        "description": "A very cool hat",
                        "rarity": "legendary"
                    }
                },
                "contractAddress": "0x1234",
                "tokenId": "42"
            },
            "price": "1500000000000000000",
            "txHash": format!("0xtx{:05}", index),
            "timestamp": 1_700_000_000 + index as i64
        })
    }

    fn page(sales: Vec<Value>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"data": {"sales": sales}}))
    }

    async fn producer(server: &MockServer) -> ItemSoldProducer {
        let subgraph =
            SubgraphClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        ItemSoldProducer::new(Arc::new(subgraph), "https://market.rainbow-hub.io")
    }

    #[tokio::test]
    async fn terminates_after_a_short_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(page(vec![sale_json(0), sale_json(1)]))
            .mount(&server)
            .await;

        let run = producer(&server).await.run(1_699_999_000_000).await.unwrap();

        assert_eq!(run.records.len(), 2);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetches_a_second_page_after_a_full_first_page() {
        let server = MockServer::start().await;
        let full_page: Vec<Value> = (0..PAGE_SIZE).map(sale_json).collect();

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(page(full_page))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(page(vec![]))
            .mount(&server)
            .await;

        let run = producer(&server).await.run(1_699_999_000_000).await.unwrap();

        assert_eq!(run.records.len(), PAGE_SIZE);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn maps_sales_into_item_sold_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(page(vec![sale_json(7)]))
            .mount(&server)
            .await;

        let run = producer(&server).await.run(0).await.unwrap();
        let record = &run.records[0];

        assert_eq!(record.notification_type, NotificationType::ItemSold);
        assert_eq!(
            record.address.as_deref(),
            Some("0xAAaaaAaaAaAaAAaaAAAaaaAAaaaAaaaaAaAAAAaA")
        );
        assert_eq!(record.event_key, "0xtx00007");
        assert_eq!(record.timestamp, (1_700_000_000 + 7) * 1000);
        assert_eq!(record.metadata["title"], "Item Sold");
        assert_eq!(record.metadata["rarity"], "legendary");
        assert_eq!(
            record.metadata["description"],
            "You just sold this Cool Hat."
        );
        assert_eq!(
            record.metadata["link"],
            "https://market.rainbow-hub.io/contracts/0x1234/tokens/42"
        );
    }

    #[tokio::test]
    async fn drops_sales_without_nft_payload_and_keeps_the_rest() {
        let server = MockServer::start().await;
        let mut broken = sale_json(1);
        broken["nft"] = Value::Null;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(page(vec![broken, sale_json(2)]))
            .mount(&server)
            .await;

        let run = producer(&server).await.run(0).await.unwrap();

        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].event_key, "0xtx00002");
    }
}
