use std::collections::HashMap;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use chrono::Utc;
use curve_database::{
    curve_helper,
    entities::{MarketPosition, MarketStatus, PositionsSnapshot, UserSummary},
    positions_snapshot_helper, CurveStore,
};
use tracing::{info, instrument};

use crate::{
    blockchain_manager::BlockchainManager,
    cascade_simulator::{market_depth, CascadeParams, CascadeSimulator, DebtCurve},
    config::{LocalConfig, ReferenceData},
    market_loader::MarketLoader,
    position_aggregator::{AggregationReport, PositionAggregator},
    position_harvester::{models::Market, PositionHarvester},
    price_oracle::HttpPriceOracle,
};

/// Runs one harvest → aggregate → simulate → persist pass.
pub struct DebtCurveService;

impl DebtCurveService {
    /// Builds and persists the debt curve of the configured deployment
    ///
    /// Stages run one after the other. Any RPC failure or degenerate simulation input aborts the
    /// run before anything is written, so the previously persisted curve stays in place.
    ///
    /// # Arguments
    /// * `local_config` - Local configuration
    /// * `reference` - Reference data of the deployment
    /// * `store` - Where the curve and the positions snapshot go
    ///
    /// # Returns
    /// * `Result<DebtCurve>` - The persisted curve
    #[instrument("DEBT_CURVE", skip_all)]
    pub async fn run(
        local_config: &LocalConfig,
        reference: &ReferenceData,
        store: &CurveStore,
    ) -> Result<DebtCurve> {
        info!(
            "Building {} curve for {} on {}",
            local_config.reference_asset, reference.protocol_name, reference.network
        );

        let provider = BlockchainManager::get_provider(local_config)?;
        let oracle = HttpPriceOracle::new(local_config)?;

        let markets = MarketLoader::load_markets(&provider, reference, &oracle).await?;
        let market_book: HashMap<Address, Market> =
            markets.iter().map(|m| (m.address, m.clone())).collect();

        let mut harvester = PositionHarvester::new(&provider, reference);
        let to_block = harvester
            .safe_head(local_config.block_safety_margin)
            .await?;
        let addresses = harvester
            .scan_memberships(
                reference.protocol.deploy_block,
                to_block,
                reference.protocol.block_step_in_init,
                local_config.address_limit,
            )
            .await
            .context("Failed to collect users")?;
        info!("Collected {} users up to block {}", addresses.len(), to_block);

        let positions = harvester
            .fetch_positions_batch(&addresses, &markets, reference.protocol.multicall_size)
            .await
            .context("Failed to fetch user positions")?;

        let stablecoin_markets = reference.stablecoin_markets();
        let report = PositionAggregator::aggregate_all(&positions, &market_book, &stablecoin_markets);

        let params = CascadeParams {
            ratio_ref: PositionAggregator::collateral_share(
                &report,
                &market_book,
                &local_config.reference_asset,
                &stablecoin_markets,
            ),
            market_depth: market_depth::load_market_depth(&local_config.market_depth_path)?,
            industry_share: local_config.industry_share,
        };
        info!(
            "Collateral ratio of {} is {:.4}",
            local_config.reference_asset, params.ratio_ref
        );

        let curve = CascadeSimulator::simulate(&report.users, &params)
            .context("Failed to build the debt curve")?;

        let snapshot = Self::build_snapshot(reference, to_block, &markets, &report);
        positions_snapshot_helper::save_positions_snapshot(store, &snapshot).await?;
        curve_helper::save_curve(store, &local_config.reference_asset, curve.points()).await?;

        Ok(curve)
    }

    /// Positions snapshot of a run, users sorted by address.
    pub fn build_snapshot(
        reference: &ReferenceData,
        block_number: u64,
        markets: &[Market],
        report: &AggregationReport,
    ) -> PositionsSnapshot {
        let (tvl, total_borrows) = report.totals();

        let users = report
            .valued_legs
            .iter()
            .map(|(address, legs)| {
                let collateral: f64 = legs.iter().map(|leg| leg.collateral_usd).sum();
                let debt: f64 = legs.iter().map(|leg| leg.debt_usd).sum();
                UserSummary {
                    address: address.to_checksum(None),
                    collateral,
                    debt,
                    net_value: collateral - debt,
                    markets: legs
                        .iter()
                        .map(|leg| MarketPosition {
                            market: leg.market.to_checksum(None),
                            collateral: leg.collateral_usd,
                            debt: leg.debt_usd,
                        })
                        .collect(),
                }
            })
            .collect();

        PositionsSnapshot {
            protocol: reference.protocol_name.clone(),
            network: reference.network.clone(),
            block_number,
            generated_at: Utc::now(),
            tvl,
            total_borrows,
            markets: markets
                .iter()
                .map(|market| MarketStatus {
                    address: market.address.to_checksum(None),
                    symbol: market.symbol.clone(),
                    price_usd: market.price_usd,
                    borrowable: market.borrowable,
                    supplyable: market.supplyable,
                })
                .collect(),
            users,
        }
    }
}
