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

const RENTALS_ENDED_QUERY: &str = r#"
    query EndedRentals($since: BigInt!, $upTo: BigInt!, $paginationId: ID!, $first: Int!) {
      rentals(
        where: {id_gt: $paginationId, endsAt_gte: $since, endsAt_lte: $upTo}
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

/// 租期结束时同时通知出租方与承租方，
/// 两条记录共享事件键，业务键因地址不同而各自去重
pub struct RentalEndedProducer {
    rentals_subgraph: Arc<SubgraphClient>,
    land_manager_subgraph: Arc<SubgraphClient>,
    marketplace_base_url: String,
    land_contract: String,
    estate_contract: String,
}

impl RentalEndedProducer {
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

    fn map_rental(&self, rental: &Rental) -> Option<Vec<NotificationRecord>> {
        let Ok(ends_at) = rental.ends_at.parse::<i64>() else {
            warn!(
                "Dropping rental {} with invalid endsAt {}",
                rental.id, rental.ends_at
            );
            return None;
        };

        let base_metadata = json!({
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
            "title": "Rental Ended",
        });

        let mut for_lessor = base_metadata.clone();
        for_lessor["description"] = json!("The rental of your LAND has ended.");
        let mut for_tenant = base_metadata;
        for_tenant["description"] = json!("Your LAND rental has ended.");

        Some(vec![
            NotificationRecord {
                notification_type: NotificationType::LandRentalEnded,
                address: Some(rental.lessor.clone()),
                event_key: rental.id.clone(),
                metadata: for_lessor,
                timestamp: ends_at * 1000,
            },
            NotificationRecord {
                notification_type: NotificationType::LandRentalEnded,
                address: Some(rental.tenant.clone()),
                event_key: rental.id.clone(),
                metadata: for_tenant,
                timestamp: ends_at * 1000,
            },
        ])
    }

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
                        let kind = if coords.len() > 1 { "ESTATE" } else { "LAND" };
                        let is_lessor = record.address.as_deref()
                            == record.metadata.get("lessor").and_then(|v| v.as_str());
                        record.metadata["land"] = json!(coords[0]);
                        record.metadata["description"] = json!(if is_lessor {
                            format!("The rental of your {} at {} has ended.", kind, coords[0])
                        } else {
                            format!("Your rental of the {} at {} has ended.", kind, coords[0])
                        });
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
impl NotificationGenerator for RentalEndedProducer {
    fn notification_type(&self) -> NotificationType {
        NotificationType::LandRentalEnded
    }

    async fn run(&self, since: i64) -> Result<ProducerRun> {
        let now = Utc::now().timestamp_millis();
        let mut produced = Vec::new();

        let mut pagination_id = String::new();
        loop {
            let response: RentalsResponse = self
                .rentals_subgraph
                .query(
                    RENTALS_ENDED_QUERY,
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
            for rental in &response.rentals {
                pagination_id = rental.id.clone();
                if let Some(records) = self.map_rental(rental) {
                    produced.extend(records);
                }
            }

            if page_len < PAGE_SIZE {
                break;
            }
        }

        self.enrich_with_coordinates(&mut produced).await?;

        Ok(ProducerRun {
            notification_type: NotificationType::LandRentalEnded,
            records: produced,
            last_run: now,
        })
    }
}
