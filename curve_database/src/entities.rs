use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point of a debt curve as persisted on disk and served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePoint {
    /// Price drop fraction in (0, 1], rounded to 4 decimals
    pub price_change: f64,
    /// Cumulative USD volume liquidated once the price has dropped by `price_change`
    pub total_liquidation: f64,
    /// Price multiplier in (0, 1] caused by selling `total_liquidation`
    pub liquidation_slippage: f64,
}

/// Per-market status recorded in the positions snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    pub address: String,
    pub symbol: String,
    pub price_usd: f64,
    pub borrowable: bool,
    pub supplyable: bool,
}

/// USD-valued position of one market for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPosition {
    pub market: String,
    pub collateral: f64,
    pub debt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub address: String,
    pub collateral: f64,
    pub debt: f64,
    pub net_value: f64,
    pub markets: Vec<MarketPosition>,
}

/// Informational dump of one harvest, written next to the curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsSnapshot {
    pub protocol: String,
    pub network: String,
    pub block_number: u64,
    pub generated_at: DateTime<Utc>,
    pub tvl: f64,
    pub total_borrows: f64,
    pub markets: Vec<MarketStatus>,
    pub users: Vec<UserSummary>,
}
