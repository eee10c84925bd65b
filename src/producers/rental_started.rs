use crate::error::Result;
use crate::models::notification::{NotificationRecord, NotificationType};
use crate::producers::subgraph::SubgraphClient;
use crate::producers::{NotificationGenerator, ProducerRun, PAGE_SIZE};
use crate::utils::land::{find_coordinates_for_land_token_id, LAND_LOOKUP_CHUNK_SIZE};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const RENTALS_STARTED_QUERY: &str = r#"
    query StartedRentals($since: BigInt!, $upTo: BigInt!, $paginationId: ID!, $first: Int!) {
      rentals(
        where: {id_gt: $paginationId, startedAt_gte: $since, startedAt_lt: $upTo}
        orderBy: id
        orderDirection: asc
        first: $first
      ) {
        id
        contractAddress
        lessor
        tenant
        operator
        startedAt
        endsAt
        tokenId
      }
    }
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Rental {
    id: String,
    contract_address: String,
    lessor: String,
    tenant: String,
    operator: String,
    started_at: String,
    ends_at: String,
    token_id: String,
}

#[derive(Debug, Deserialize)]
struct RentalsResponse {
    rentals: Vec<Rental>,
}

pub struct RentalStartedProducer {
    rentals_subgraph: Arc<SubgraphClient>,
    land_manager_subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
    land_contract: String,
    estate_contract: String,
}

impl RentalStartedProducer {
    pub fn new(
        rentals_subgraph: Arc<SubgraphClient>,
        land_manager_subgraph: Arc<SubgraphClient>,
        marketplace_base_url: &str,
        land_contract: &str,
        estate_contract: &str,
    ) -> Self {
        Self {
            rentals_subgraph,
            land_manager_subgraph,
            marketplace_base_url: marketplace_base_url.to_string(),
            land_contract: land_contract.to_lowercase(),
            estate_contract: estate_contract.to_lowercase(),
        }
    }

    fn map_rental(&self, rental: Rental) -> Option<NotificationRecord> {
        let Ok(started_at) = rental.started_at.parse::<i64>() else {
            warn!(
                "Dropping rental {} with invalid startedAt {}",
                rental.id, rental.started_at
            );
            return None;
        };

        Some(NotificationRecord {
            notification_type: NotificationType::LandRented,
            address: Some(rental.lessor.clone()),
            event_key: rental.id,
            metadata: json!({
                "contract": rental.contract_address,
                "lessor": rental.lessor,
                "tenant": rental.tenant,
                "operator": rental.operator,
                "startedAt": rental.started_at,
                "endedAt": rental.ends_at,
                "tokenId": rental.token_id,
                "link": format!(
                    "{}/contracts/{}/tokens/{}/manage",
                    self.marketplace_base_url, rental.contract_address, rental.token_id
                ),
                "title": "LAND Rented",
                "description": format!("Your LAND was rented by {}.", rental.tenant),
            }),
            timestamp: started_at * 1000,
        })
    }

    /// 用地块坐标补充描述。坐标缺失时保留初始描述
    async fn enrich_with_coordinates(&self, records: &mut [NotificationRecord]) -> Result<()> {
        let mut index = 0;
        while index < records.len() {
            let end = (index + LAND_LOOKUP_CHUNK_SIZE).min(records.len());
            let coordinates = find_coordinates_for_land_token_id(
                &self.land_manager_subgraph,
                &self.land_contract,
                &self.estate_contract,
                &records[index..end],
            )
            .await?;

            for record in &mut records[index..end] {
                let token_id = record
                    .metadata
                    .get("tokenId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                match coordinates.get(&token_id) {
                    Some(coords) if !coords.is_empty() => {
                        // ESTATE 也只展示其中一个地块的坐标
                        let kind = if coords.len() > 1 { "ESTATE" } else { "LAND" };
                        let tenant = record
                            .metadata
                            .get("tenant")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        record.metadata["land"] = json!(coords[0]);
                        record.metadata["description"] = json!(format!(
                            "Your {} at {} was rented by {}.",
                            kind, coords[0], tenant
                        ));
                    }
                    _ => warn!("No coordinates found for token id {}", token_id),
                }
            }

            index = end;
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationGenerator for RentalStartedProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::LandRented
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: RentalsResponse = self
                .rentals_subgraph
                .query(
                    RENTALS_STARTED_QUERY,
                    json!({
                        "since": since / 1000,
                        "upTo": now / 1000,
                        "paginationId": pagination_id,
                        "first": PAGE_SIZE,
                    }),
                )
                .await?;

            if response.rentals.is_empty() {
                break;
            }

            let page_len = response.rentals.len();
            for rental in response.rentals {
                pagination_id = rental.id.clone();
                if let Some(record) = self.map_rental(rental) {
                    produced.push(record);
                }
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        self.enrich_with_coordinates(&mut produced).await?;

        Ok(ProducerRun {
            notification_type: NotificationType::LandRented,
            records: produced,
            last_run: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LAND_CONTRACT: &str = "0xf87e31492faf9a91b02ee0deaad50d51d56d5d4d";
    const ESTATE_CONTRACT: &str = "0x959e104e1a4db6317fa58f8295f586e1a978c297";

    #[tokio::test]
    async fn enriches_rentals_with_parcel_coordinates() {
        let rentals_server = MockServer::start().await;
        let land_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "rentals": [{
                        "id": "rental-1",
                        "contractAddress": LAND_CONTRACT,
                        "lessor": "0x1111111111111111111111111111111111111111",
                        "tenant": "0x2222222222222222222222222222222222222222",
                        "operator": "0x2222222222222222222222222222222222222222",
                        "startedAt": "1700000000",
                        "endsAt": "1702592000",
                        "tokenId": "115"
                    }]
                }
            })))
            .mount(&rentals_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "parcels": [{"x": -42, "y": 17, "tokenId": "115"}],
                    "estates": []
                }
            })))
            .mount(&land_server)
            .await;

        let producer = RentalStartedProducer::new(
            Arc::new(SubgraphClient::new(&rentals_server.uri(), Duration::from_secs(5)).unwrap()),
            Arc::new(SubgraphClient::new(&land_server.uri(), Duration::from_secs(5)).unwrap()),
            "https://market.rainbow-hub.io",
            LAND_CONTRACT,
            ESTATE_CONTRACT,
        );

        let run = producer.run(1_699_999_000_000).await.unwrap();
        let record = &run.records[0];

        assert_eq!(record.notification_type, NotificationType::LandRented);
        assert_eq!(record.event_key, "rental-1");
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.metadata["land"], "-42,17");
        assert_eq!(
            record.metadata["description"],
            "Your LAND at -42,17 was rented by 0x2222222222222222222222222222222222222222."
        );
    }
}
