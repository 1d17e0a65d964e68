use anyhow::Result;

use super::env_helper::{load_env_var, load_env_var_or, load_optional_env_var};

pub const DEFAULT_BLOCK_SAFETY_MARGIN: u64 = 10;
pub const DEFAULT_INDUSTRY_SHARE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub rpc_url: String,
    pub network: String,
    pub protocol: String,
    pub reference_asset: String,
    pub protocol_reference_path: String,
    pub addresses_path: String,
    pub market_depth_path: String,
    pub block_safety_margin: u64,
    pub address_limit: Option<usize>,
    pub industry_share: f64,
    pub coingecko_api_url: String,
    pub cryptocompare_api_url: String,
    pub krystal_api_url: String,
}

impl LocalConfig {
    pub fn load_from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: load_env_var("RPC_URL")?,
            network: load_env_var::<String>("NETWORK")?.to_uppercase(),
            protocol: load_env_var::<String>("PROTOCOL")?.to_lowercase(),
            reference_asset: load_env_var_or("REFERENCE_ASSET", "ETH".to_string())?,
            protocol_reference_path: load_env_var_or(
                "PROTOCOL_REFERENCE_PATH",
                "data/protocol_reference.json".to_string(),
            )?,
            addresses_path: load_env_var_or("ADDRESSES_PATH", "data/addresses.json".to_string())?,
            market_depth_path: load_env_var_or(
                "MARKET_DEPTH_PATH",
                "data/market_depth.json".to_string(),
            )?,
            block_safety_margin: load_env_var_or(
                "BLOCK_SAFETY_MARGIN",
                DEFAULT_BLOCK_SAFETY_MARGIN,
            )?,
            address_limit: load_optional_env_var("ADDRESS_LIMIT")?,
            industry_share: load_env_var_or("INDUSTRY_SHARE", DEFAULT_INDUSTRY_SHARE)?,
            coingecko_api_url: load_env_var_or(
                "COINGECKO_API_URL",
                "https://api.coingecko.com/api/v3".to_string(),
            )?,
            cryptocompare_api_url: load_env_var_or(
                "CRYPTOCOMPARE_API_URL",
                "https://min-api.cryptocompare.com".to_string(),
            )?,
            krystal_api_url: load_env_var_or(
                "KRYSTAL_API_URL",
                "https://pricing-prod.krystal.team".to_string(),
            )?,
        })
    }
}
