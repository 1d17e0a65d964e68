pub mod multicall;

use alloy::{
    network::Ethereum,
    providers::{Provider, ProviderBuilder},
    rpc::client::RpcClient,
    transports::{http::reqwest::Url, layers::RetryBackoffLayer},
};
use anyhow::Result;

use crate::config::LocalConfig;

/// BlockchainManager handles blockchain-related connections.
pub struct BlockchainManager;

impl BlockchainManager {
    /// Creates and returns an HTTP provider instance for blockchain interactions.
    ///
    /// Rate-limited requests are retried by the transport layer with backoff. Once these retries
    /// are exhausted the error surfaces to the caller and aborts the run.
    ///
    /// # Arguments
    /// * `local_config` - Local configuration containing the RPC URL
    ///
    /// # Returns
    /// * `Result<impl Provider<Ethereum>>` - A Result containing either the provider instance or an error
    pub fn get_provider(local_config: &LocalConfig) -> Result<impl Provider<Ethereum>> {
        // Instantiate the RetryBackoffLayer with the configuration
        let retry_layer = RetryBackoffLayer::new(10, 1000, 10000);

        let client = RpcClient::builder()
            .layer(retry_layer)
            .http(Url::parse(&local_config.rpc_url)?);

        let provider = ProviderBuilder::new().on_client(client);

        Ok(provider)
    }
}
