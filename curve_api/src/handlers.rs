use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use curve_database::{curve_helper, CurveStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

/// Scale of a price drop sent as a fixed point integer.
const PRICE_DROP_SCALE: f64 = 1e18;

#[derive(Debug, Deserialize)]
pub struct AccumulatedDebtQuery {
    pub asset: Option<String>,
    #[serde(rename = "priceDrop")]
    pub price_drop: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatedDebt {
    pub accumulated_liquidations: f64,
    pub unit: &'static str,
    pub slippage: f64,
    pub price_change: f64,
}

#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    CurveNotFound { asset: String },
    OutOfRange { asset: String, price_drop: f64 },
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::CurveNotFound { asset } => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "No curve for this asset", "asset": asset })),
            )
                .into_response(),
            ApiError::OutOfRange { asset, price_drop } => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Price drop is beyond the last point of the curve",
                    "asset": asset,
                    "priceDrop": price_drop,
                })),
            )
                .into_response(),
            ApiError::Internal(e) => {
                error!("Failed to serve accumulated debt: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Parses a price drop given either as a fraction (`0.25`, `0`, `1`) or as an integer scaled
/// by 10^18 (`250000000000000000`).
pub fn parse_price_drop(raw: &str) -> Result<f64, ApiError> {
    let raw = raw.trim();
    let value = if raw.contains('.') || raw == "0" || raw == "1" {
        raw.parse::<f64>()
            .map_err(|_| ApiError::InvalidInput(format!("Invalid priceDrop {}", raw)))?
    } else {
        let scaled = raw
            .parse::<u128>()
            .map_err(|_| ApiError::InvalidInput(format!("Invalid priceDrop {}", raw)))?;
        scaled as f64 / PRICE_DROP_SCALE
    };

    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ApiError::InvalidInput(format!(
            "priceDrop {} is outside [0, 1]",
            raw
        )));
    }

    Ok(value)
}

/// Asset symbols are used as file names, only ASCII alphanumerics get through.
fn parse_asset(raw: &str) -> Result<String, ApiError> {
    let asset = raw.trim();
    if asset.is_empty() || !asset.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::InvalidInput(format!("Invalid asset {}", raw)));
    }
    Ok(asset.to_string())
}

/// Accumulated liquidations of `asset` at the requested price drop
///
/// # Arguments
/// * `store` - Curve store written by the ETL
/// * `query` - Raw query parameters
///
/// # Returns
/// * `Result<AccumulatedDebt, ApiError>` - The matching curve point in USD
pub async fn accumulated_debt(
    store: &CurveStore,
    query: &AccumulatedDebtQuery,
) -> Result<AccumulatedDebt, ApiError> {
    let asset = parse_asset(
        query
            .asset
            .as_deref()
            .ok_or_else(|| ApiError::InvalidInput("Missing asset".to_string()))?,
    )?;
    let price_drop = parse_price_drop(
        query
            .price_drop
            .as_deref()
            .ok_or_else(|| ApiError::InvalidInput("Missing priceDrop".to_string()))?,
    )?;

    let curve = curve_helper::load_curve(store, &asset)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::CurveNotFound {
            asset: asset.clone(),
        })?;

    let point = curve_helper::accumulated_debt_at(&curve, price_drop).ok_or_else(|| {
        ApiError::OutOfRange {
            asset: asset.clone(),
            price_drop,
        }
    })?;

    Ok(AccumulatedDebt {
        accumulated_liquidations: point.total_liquidation,
        unit: "USD",
        slippage: point.liquidation_slippage,
        price_change: point.price_change,
    })
}

pub async fn get_accumulated_debt(
    State(store): State<Arc<CurveStore>>,
    Query(query): Query<AccumulatedDebtQuery>,
) -> Response {
    match accumulated_debt(&store, &query).await {
        Ok(debt) => {
            info!(
                "Accumulated debt of {:?} at {:?}: {} USD",
                query.asset, query.price_drop, debt.accumulated_liquidations
            );
            (StatusCode::OK, Json(debt)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use curve_database::entities::CurvePoint;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("curve_api_{}_{}", name, std::process::id()))
    }

    async fn store_with_eth_curve(name: &str) -> CurveStore {
        let root = scratch_dir(name);
        let store = CurveStore::new(root.join("curves"), root.join("users"));
        store.reset().await.unwrap();
        let curve = vec![
            CurvePoint {
                price_change: 0.1,
                total_liquidation: 50.0,
                liquidation_slippage: 0.999,
            },
            CurvePoint {
                price_change: 0.3,
                total_liquidation: 150.0,
                liquidation_slippage: 0.997,
            },
            CurvePoint {
                price_change: 0.5,
                total_liquidation: 175.0,
                liquidation_slippage: 0.996,
            },
        ];
        curve_helper::save_curve(&store, "ETH", &curve).await.unwrap();
        store
    }

    fn query(asset: &str, price_drop: &str) -> AccumulatedDebtQuery {
        AccumulatedDebtQuery {
            asset: Some(asset.to_string()),
            price_drop: Some(price_drop.to_string()),
        }
    }

    #[test]
    fn test_parse_price_drop() {
        assert_eq!(parse_price_drop("0.25").unwrap(), 0.25);
        assert_eq!(parse_price_drop("0").unwrap(), 0.0);
        assert_eq!(parse_price_drop("1").unwrap(), 1.0);
        assert_eq!(parse_price_drop("500000000000000000").unwrap(), 0.5);
        assert_eq!(parse_price_drop("1000000000000000000").unwrap(), 1.0);

        assert!(matches!(parse_price_drop("1.5"), Err(ApiError::InvalidInput(_))));
        assert!(matches!(parse_price_drop("-0.1"), Err(ApiError::InvalidInput(_))));
        assert!(matches!(parse_price_drop("abc"), Err(ApiError::InvalidInput(_))));
        assert!(matches!(
            parse_price_drop("2000000000000000000"),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_accumulated_debt_ceiling_lookup() {
        let store = store_with_eth_curve("lookup").await;

        let debt = accumulated_debt(&store, &query("eth", "0.2")).await.unwrap();
        assert_eq!(
            debt,
            AccumulatedDebt {
                accumulated_liquidations: 150.0,
                unit: "USD",
                slippage: 0.997,
                price_change: 0.3,
            }
        );

        let debt = accumulated_debt(&store, &query("ETH", "100000000000000000"))
            .await
            .unwrap();
        assert_eq!(debt.accumulated_liquidations, 50.0);
    }

    #[tokio::test]
    async fn test_accumulated_debt_errors() {
        let store = store_with_eth_curve("errors").await;

        let missing = accumulated_debt(&store, &query("BTC", "0.2")).await;
        assert!(matches!(missing, Err(ApiError::CurveNotFound { ref asset }) if asset == "BTC"));
        assert_eq!(
            missing.unwrap_err().into_response().status(),
            StatusCode::NOT_FOUND
        );

        let beyond = accumulated_debt(&store, &query("ETH", "0.6")).await;
        assert!(matches!(beyond, Err(ApiError::OutOfRange { price_drop, .. }) if price_drop == 0.6));
        assert_eq!(
            beyond.unwrap_err().into_response().status(),
            StatusCode::NOT_FOUND
        );

        let traversal = accumulated_debt(&store, &query("../eth", "0.2")).await;
        assert_eq!(
            traversal.unwrap_err().into_response().status(),
            StatusCode::BAD_REQUEST
        );

        let no_drop = AccumulatedDebtQuery {
            asset: Some("ETH".to_string()),
            price_drop: None,
        };
        assert!(matches!(
            accumulated_debt(&store, &no_drop).await,
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_handler_status() {
        let store = Arc::new(store_with_eth_curve("handler").await);

        let response = get_accumulated_debt(State(store.clone()), Query(query("ETH", "0.5"))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_accumulated_debt(State(store), Query(query("ETH", "oops"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
