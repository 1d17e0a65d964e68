use alloy::{network::Ethereum, primitives::Address, providers::Provider};
use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::{
    config::ReferenceData,
    position_harvester::models::Market,
    price_oracle::{native_coin, PriceOracle},
    utils::contracts::{CToken, Comptroller, Erc20},
};

/// Lists the protocol's markets and prices their underlyings.
pub struct MarketLoader;

impl MarketLoader {
    /// Loads every market of the comptroller with its symbol, price and flags
    ///
    /// # Arguments
    /// * `provider` - Blockchain provider
    /// * `reference` - Reference data of the deployment
    /// * `oracle` - Price source for the underlyings
    ///
    /// # Returns
    /// * `Result<Vec<Market>>` - Markets in comptroller order; unpriced markets carry a zero price
    #[instrument("MARKET_LOADER", skip_all)]
    pub async fn load_markets<P: Provider<Ethereum>>(
        provider: &P,
        reference: &ReferenceData,
        oracle: &dyn PriceOracle,
    ) -> Result<Vec<Market>> {
        let comptroller = Comptroller::new(reference.protocol.comptroller, provider);
        let addresses = comptroller
            .getAllMarkets()
            .call()
            .await
            .context("Failed to list markets")?
            ._0;

        info!("Found {} markets", addresses.len());

        let mut markets = Vec::with_capacity(addresses.len());
        for address in addresses {
            markets.push(Self::load_market(provider, reference, oracle, address).await?);
        }

        Ok(markets)
    }

    async fn load_market<P: Provider<Ethereum>>(
        provider: &P,
        reference: &ReferenceData,
        oracle: &dyn PriceOracle,
        address: Address,
    ) -> Result<Market> {
        let (underlying, symbol, price_usd) = if reference.is_native_market(&address) {
            let symbol = native_coin(&reference.network)
                .map(|(_, ticker)| ticker.to_string())
                .unwrap_or_else(|| reference.network.clone());
            let price = oracle.native_price(&reference.network).await;
            (None, symbol, price)
        } else {
            let underlying = CToken::new(address, provider)
                .underlying()
                .call()
                .await
                .with_context(|| format!("Failed to get underlying of market {}", address))?
                ._0;
            let symbol = Self::token_symbol(provider, underlying).await;
            let price = oracle.token_price(&reference.network, underlying).await;
            (Some(underlying), symbol, price)
        };

        let market = Market {
            address,
            symbol,
            underlying,
            price_usd,
            borrowable: reference.is_borrowable(&address),
            supplyable: reference.is_supplyable(&address),
        };

        if market.has_price() {
            info!(
                "Symbol {} ({:?}) ; market {} ; price {}",
                market.symbol, market.underlying, market.address, market.price_usd
            );
        } else {
            warn!(
                "Market {} ({}) has no price, its positions will be left out",
                market.address, market.symbol
            );
        }

        Ok(market)
    }

    async fn token_symbol<P: Provider<Ethereum>>(provider: &P, token: Address) -> String {
        match Erc20::new(token, provider).symbol().call().await {
            Ok(symbol) => symbol._0,
            Err(e) => {
                warn!("Error fetching symbol for {}: {}", token, e);
                "unknown".to_string()
            }
        }
    }
}
