use crate::error::Result;
use crate::models::notification::NotificationRecord;
use crate::producers::subgraph::SubgraphClient;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// 坐标批量查询的分片大小
pub const LAND_LOOKUP_CHUNK_SIZE: usize = 1000;

const LAND_AND_ESTATE_QUERY: &str = r#"
    query LandsAndEstates($landTokenIds: [BigInt!], $estateTokenIds: [ID!]) {
      parcels(where: {tokenId_in: $landTokenIds}) {
        x
        y
        tokenId
      }
      estates(where: {id_in: $estateTokenIds}) {
        id
        parcels {
          x
          y
        }
      }
    }
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Parcel {
    x: i64,
    y: i64,
    token_id: String,
}

#[derive(Debug, Deserialize)]
struct EstateParcel {
    x: i64,
    y: i64,
}

#[derive(Debug, Deserialize)]
struct Estate {
    id: String,
    parcels: Vec<EstateParcel>,
}

#[derive(Debug, Deserialize)]
struct LandAndEstateResponse {
    parcels: Vec<Parcel>,
    estates: Vec<Estate>,
}

fn token_ids_for<'a>(batch: &'a [NotificationRecord], contract: &str) -> Vec<&'a str> {
    batch
        .iter()
        .filter(|r| r.metadata.get("contract").and_then(|v| v.as_str()) == Some(contract))
        .filter_map(|r| r.metadata.get("tokenId").and_then(|v| v.as_str()))
        .collect()
}

/// 把一批租赁通知携带的 LAND/ESTATE token id 解析为坐标列表。
/// ESTATE 返回其全部地块的坐标
pub async fn find_coordinates_for_land_token_id(
    land_manager: &SubgraphClient,
    land_contract: &str,
    estate_contract: &str,
    batch: &[NotificationRecord],
) -> Result<HashMap<String, Vec<String>>> {
    let response: LandAndEstateResponse = land_manager
        .query(
            LAND_AND_ESTATE_QUERY,
            json!({
                "landTokenIds": token_ids_for(batch, land_contract),
                "estateTokenIds": token_ids_for(batch, estate_contract),
            }),
        )
        .await?;

    let mut coordinates: HashMap<String, Vec<String>> = HashMap::new();
    for parcel in response.parcels {
        coordinates.insert(parcel.token_id, vec![format!("{},{}", parcel.x, parcel.y)]);
    }
    for estate in response.estates {
        coordinates.insert(
            estate.id,
            estate
                .parcels
                .iter()
                .map(|parcel| format!("{},{}", parcel.x, parcel.y))
                .collect(),
        );
    }

    Ok(coordinates)
}
