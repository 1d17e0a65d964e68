use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use tracing::info;

/// Two-sided order-book depth of one trading pair, as exported from CoinGecko's market table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthQuote {
    pub pair: String,
    /// USD needed to move the price up by 2%
    #[serde(deserialize_with = "deserialize_usd_amount")]
    pub depth_up2: f64,
    /// USD needed to move the price down by 2%
    #[serde(deserialize_with = "deserialize_usd_amount")]
    pub depth_down2: f64,
}

impl DepthQuote {
    /// Depth extrapolated from the ±2% band to the whole book.
    pub fn virtual_market_size(&self) -> f64 {
        let up_depth = self.depth_up2 * 0.98 * 100.0;
        let down_depth = self.depth_down2 * 1.02 * 100.0;
        (up_depth + down_depth) / 2.0
    }

    /// Pairs quoted against USD or a USD stablecoin.
    pub fn is_usd_pair(&self) -> bool {
        self.pair.contains("/US")
    }
}

/// Sum of the virtual market size of every USD-quoted pair.
pub fn total_market_depth(quotes: &[DepthQuote]) -> f64 {
    quotes
        .iter()
        .filter(|quote| quote.is_usd_pair())
        .map(DepthQuote::virtual_market_size)
        .sum()
}

/// Loads depth quotes from `path` and returns the total market depth
///
/// # Errors
/// Fails when the file can't be read or parsed, or when no USD pair contributes depth.
pub fn load_market_depth(path: impl AsRef<Path>) -> Result<f64> {
    let path = path.as_ref();
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let quotes: Vec<DepthQuote> = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed depth quotes in {}", path.display()))?;

    let depth = total_market_depth(&quotes);
    if !depth.is_finite() || depth <= 0.0 {
        bail!("No usable market depth in {}", path.display());
    }

    info!(
        "Market depth {:.2} USD from {} quotes",
        depth,
        quotes.len()
    );

    Ok(depth)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UsdAmount {
    Number(f64),
    Text(String),
}

/// Accepts plain numbers as well as strings such as `"$1,234,567"`.
fn deserialize_usd_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match UsdAmount::deserialize(deserializer)? {
        UsdAmount::Number(value) => Ok(value),
        UsdAmount::Text(text) => text
            .replace(['$', ','], "")
            .trim()
            .parse::<f64>()
            .map_err(serde::de::Error::custom),
    }
}
