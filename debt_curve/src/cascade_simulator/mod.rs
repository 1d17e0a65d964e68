//! Liquidation cascade model.
//!
//! Every aggregated user is assumed to be liquidated once the analysed asset has dropped by
//! `1 - liquidation_perc`. Walking the users from the most to the least exposed gives the volume
//! sold at each price drop, and the slippage model turns that volume into a price multiplier.

pub mod market_depth;

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use curve_database::{curve_helper, entities::CurvePoint};
use tracing::{info, instrument};

use crate::{position_aggregator::models::AggregatedUser, utils::math_helper};

/// Decimals kept on the price change axis.
pub const PRICE_CHANGE_DECIMALS: i32 = 4;

/// Smallest bucket of the price change axis, drops below one tick land here.
pub const MIN_PRICE_CHANGE: f64 = 0.0001;

/// Price multiplier after selling `sale_amount` USD into a market of `depth` USD.
///
/// Equals 1 for an empty sale and decreases strictly towards 0 as the sale grows.
pub fn slippage(sale_amount: f64, depth: f64) -> f64 {
    1.0 / (1.0 + 2.0 * sale_amount / depth)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    /// Share of the non-stable collateral denominated in the analysed asset
    pub ratio_ref: f64,
    /// Total market depth of the analysed asset in USD
    pub market_depth: f64,
    /// Share of the economy-wide liquidations the protocol accounts for
    pub industry_share: f64,
}

impl CascadeParams {
    pub fn validate(&self) -> Result<()> {
        if !self.market_depth.is_finite() || self.market_depth <= 0.0 {
            bail!("Market depth {} is not usable", self.market_depth);
        }
        if !self.ratio_ref.is_finite() || self.ratio_ref <= 0.0 || self.ratio_ref > 1.0 {
            bail!("Collateral ratio {} is outside (0, 1]", self.ratio_ref);
        }
        if !self.industry_share.is_finite()
            || self.industry_share <= 0.0
            || self.industry_share > 1.0
        {
            bail!("Industry share {} is outside (0, 1]", self.industry_share);
        }
        Ok(())
    }
}

/// Validated debt curve: unique price changes in ascending order, non-decreasing liquidations.
#[derive(Debug, Clone, PartialEq)]
pub struct DebtCurve {
    points: Vec<CurvePoint>,
}

impl DebtCurve {
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }
}

pub struct CascadeSimulator;

impl CascadeSimulator {
    /// One point per user, most exposed user first, before any rounding.
    pub fn liquidation_steps(users: &[AggregatedUser], params: &CascadeParams) -> Vec<CurvePoint> {
        let mut sorted: Vec<&AggregatedUser> = users.iter().collect();
        sorted.sort_by(|a, b| {
            b.liquidation_perc
                .total_cmp(&a.liquidation_perc)
                .then_with(|| a.address.cmp(&b.address))
        });

        let mut cumulative_eth = 0.0;
        sorted
            .into_iter()
            .map(|user| {
                cumulative_eth += user.eth_collateral_usd;
                let total_liquidation = cumulative_eth * params.ratio_ref;
                CurvePoint {
                    price_change: 1.0 - user.liquidation_perc,
                    total_liquidation,
                    liquidation_slippage: slippage(
                        total_liquidation / params.industry_share,
                        params.market_depth,
                    ),
                }
            })
            .collect()
    }

    /// Rounds price changes and merges the steps falling in the same bucket.
    ///
    /// Price changes rounding to zero are moved up to [`MIN_PRICE_CHANGE`].
    /// A bucket keeps its largest liquidation volume and its worst slippage.
    pub fn compact(steps: &[CurvePoint]) -> DebtCurve {
        let scale = 10f64.powi(PRICE_CHANGE_DECIMALS);
        let mut buckets: BTreeMap<i64, CurvePoint> = BTreeMap::new();

        for step in steps {
            let price_change = math_helper::round_to(step.price_change, PRICE_CHANGE_DECIMALS)
                .max(MIN_PRICE_CHANGE);
            let key = (price_change * scale).round() as i64;

            buckets
                .entry(key)
                .and_modify(|bucket| {
                    bucket.total_liquidation = bucket.total_liquidation.max(step.total_liquidation);
                    bucket.liquidation_slippage =
                        bucket.liquidation_slippage.min(step.liquidation_slippage);
                })
                .or_insert(CurvePoint {
                    price_change,
                    ..*step
                });
        }

        DebtCurve {
            points: buckets.into_values().collect(),
        }
    }

    /// Builds the debt curve of the aggregated users
    ///
    /// # Errors
    /// Fails instead of producing a partial curve when the parameters are degenerate, when there
    /// is no user to liquidate, or when the resulting curve breaks its ordering invariants.
    #[instrument("SIMULATOR", skip(users))]
    pub fn simulate(users: &[AggregatedUser], params: &CascadeParams) -> Result<DebtCurve> {
        params.validate()?;
        if users.is_empty() {
            bail!("No liquidatable users to simulate");
        }

        let steps = Self::liquidation_steps(users, params);
        let curve = Self::compact(&steps);
        curve_helper::validate_curve(curve.points())?;

        if let Some(last) = curve.points().last() {
            info!(
                "Debt curve with {} points from {} users, {:.2} USD liquidated at a {:.2}% drop",
                curve.points().len(),
                users.len(),
                last.total_liquidation,
                last.price_change * 100.0
            );
        }

        Ok(curve)
    }
}
