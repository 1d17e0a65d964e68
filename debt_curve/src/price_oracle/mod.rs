use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::{config::LocalConfig, utils::retry::RetryPolicy};

/// Source of USD prices for market underlyings.
///
/// Implementations are best-effort: a price that can't be obtained from any provider is
/// reported as `0.0`, never as an error.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// USD price of an ERC20 token deployed on `network`
    async fn token_price(&self, network: &str, token: Address) -> f64;

    /// USD price of the native coin of `network`
    async fn native_price(&self, network: &str) -> f64;
}

/// CoinGecko platform id used by the token price endpoint.
pub fn coingecko_platform(network: &str) -> Option<&'static str> {
    match network {
        "ETH" => Some("ethereum"),
        "CRO" => Some("cronos"),
        "AURORA" => Some("aurora"),
        _ => None,
    }
}

/// CoinGecko coin id and ticker of the native coin.
pub fn native_coin(network: &str) -> Option<(&'static str, &'static str)> {
    match network {
        "ETH" | "AURORA" => Some(("ethereum", "ETH")),
        "CRO" => Some(("crypto-com-chain", "CRO")),
        _ => None,
    }
}

/// Price oracle chaining public HTTP price APIs.
///
/// Token prices come from Krystal on Ethereum and from CoinGecko otherwise (or when Krystal has
/// nothing). Native coins come from CoinGecko with CryptoCompare as fallback.
#[derive(Debug, Clone)]
pub struct HttpPriceOracle {
    client: reqwest::Client,
    coingecko_api_url: String,
    cryptocompare_api_url: String,
    krystal_api_url: String,
    retry_policy: RetryPolicy,
}

impl HttpPriceOracle {
    pub fn new(local_config: &LocalConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            coingecko_api_url: local_config.coingecko_api_url.trim_end_matches('/').to_string(),
            cryptocompare_api_url: local_config
                .cryptocompare_api_url
                .trim_end_matches('/')
                .to_string(),
            krystal_api_url: local_config.krystal_api_url.trim_end_matches('/').to_string(),
            retry_policy: RetryPolicy::default(),
        })
    }

    /// GET `url` and parse the body, retrying while the provider answers 429.
    async fn get_json(&self, url: &str) -> Option<Value> {
        let response = self
            .retry_policy
            .run(
                || self.client.get(url).send(),
                |result| {
                    matches!(result, Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS)
                },
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Price request to {} failed: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Price request to {} returned {}", url, response.status());
            return None;
        }

        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Price response from {} is not JSON: {}", url, e);
                None
            }
        }
    }

    async fn krystal_price(&self, token: Address) -> Option<f64> {
        let url = format!(
            "{}/v1/market?addresses={:#x}&chain=ethereum@1&sparkline=false",
            self.krystal_api_url, token
        );
        parse_krystal_price(&self.get_json(&url).await?)
    }

    async fn coingecko_token_price(&self, network: &str, token: Address) -> Option<f64> {
        let platform = coingecko_platform(network)?;
        let url = format!(
            "{}/simple/token_price/{}?contract_addresses={:#x}&vs_currencies=usd",
            self.coingecko_api_url, platform, token
        );
        parse_coingecko_token_price(&self.get_json(&url).await?, token)
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    #[instrument("PRICE_ORACLE", skip(self))]
    async fn token_price(&self, network: &str, token: Address) -> f64 {
        if network == "ETH" {
            if let Some(price) = self.krystal_price(token).await.filter(|p| *p > 0.0) {
                debug!("Krystal price {}", price);
                return price;
            }
        }

        match self.coingecko_token_price(network, token).await {
            Some(price) => price,
            None => {
                warn!("No price for {} on {}, using 0", token, network);
                0.0
            }
        }
    }

    #[instrument("PRICE_ORACLE", skip(self))]
    async fn native_price(&self, network: &str) -> f64 {
        let Some((coin_id, ticker)) = native_coin(network) else {
            warn!("Unknown native coin for {}, using 0", network);
            return 0.0;
        };

        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd",
            self.coingecko_api_url, coin_id
        );
        if let Some(price) = self
            .get_json(&url)
            .await
            .and_then(|body| parse_coingecko_simple_price(&body, coin_id))
        {
            return price;
        }

        let url = format!(
            "{}/data/price?fsym={}&tsyms=USD",
            self.cryptocompare_api_url, ticker
        );
        match self
            .get_json(&url)
            .await
            .and_then(|body| parse_cryptocompare_price(&body))
        {
            Some(price) => price,
            None => {
                warn!("No price for native coin {}, using 0", ticker);
                0.0
            }
        }
    }
}

pub fn parse_krystal_price(body: &Value) -> Option<f64> {
    body.get("marketData")?.get(0)?.get("price")?.as_f64()
}

/// CoinGecko keys token prices by lowercase contract address.
pub fn parse_coingecko_token_price(body: &Value, token: Address) -> Option<f64> {
    let key = format!("{:#x}", token);
    body.get(&key)?.get("usd")?.as_f64()
}

pub fn parse_coingecko_simple_price(body: &Value, coin_id: &str) -> Option<f64> {
    body.get(coin_id)?.get("usd")?.as_f64()
}

pub fn parse_cryptocompare_price(body: &Value) -> Option<f64> {
    body.get("USD")?.as_f64()
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_krystal_price() {
        let body = json!({ "marketData": [{ "price": 1.0004, "symbol": "USDC" }] });
        assert_eq!(parse_krystal_price(&body), Some(1.0004));
        assert_eq!(parse_krystal_price(&json!({ "marketData": [] })), None);
        assert_eq!(parse_krystal_price(&json!({ "marketData": [{ "price": null }] })), None);
    }

    #[test]
    fn test_parse_coingecko_token_price() {
        let token = address!("6B175474E89094C44Da98b954EedeAC495271d0F");
        let body = json!({ "0x6b175474e89094c44da98b954eedeac495271d0f": { "usd": 0.9998 } });

        assert_eq!(parse_coingecko_token_price(&body, token), Some(0.9998));
        assert_eq!(parse_coingecko_token_price(&json!({}), token), None);
    }

    #[test]
    fn test_parse_native_prices() {
        assert_eq!(
            parse_coingecko_simple_price(&json!({ "ethereum": { "usd": 3120.5 } }), "ethereum"),
            Some(3120.5)
        );
        assert_eq!(parse_cryptocompare_price(&json!({ "USD": 0.092 })), Some(0.092));
        assert_eq!(parse_cryptocompare_price(&json!({ "Response": "Error" })), None);
    }

    #[test]
    fn test_network_ids() {
        assert_eq!(coingecko_platform("CRO"), Some("cronos"));
        assert_eq!(native_coin("AURORA"), Some(("ethereum", "ETH")));
        assert_eq!(coingecko_platform("SOL"), None);
    }
}
