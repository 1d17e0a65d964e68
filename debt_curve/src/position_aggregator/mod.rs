pub mod models;

use std::collections::{BTreeMap, HashMap, HashSet};

use alloy::primitives::Address;
use tracing::{info, instrument, warn};

use crate::{
    position_harvester::models::{BorrowerPosition, Market},
    utils::math_helper,
};
use models::{AggregatedUser, AggregatedUserBuilder, Exclusion, ValuedLeg};

/// What happened to one entered market during valuation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LegStatus {
    Valued(ValuedLeg),
    /// Unknown market or zero oracle price
    MissingPrice,
    /// Collateral or borrow sub-call failed, the market has no leg at all, or a balance is too
    /// large to value
    DecodeFailed,
}

/// Legs of one position that could be valued, and how many could not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Valuation {
    pub legs: Vec<ValuedLeg>,
    pub missing_price: usize,
    pub failed_decode: usize,
}

/// Outcome of valuing and aggregating every harvested position.
#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    pub users: Vec<AggregatedUser>,
    /// Valued legs of every user, kept or excluded, grouped by user
    pub valued_legs: BTreeMap<Address, Vec<ValuedLeg>>,
    pub exclusions: HashMap<Exclusion, usize>,
    pub legs_missing_price: usize,
    pub legs_failed_decode: usize,
}

impl AggregationReport {
    pub fn excluded(&self) -> usize {
        self.exclusions.values().sum()
    }

    /// Total collateral and debt in USD over every valued leg.
    pub fn totals(&self) -> (f64, f64) {
        self.valued_legs
            .values()
            .flatten()
            .fold((0.0, 0.0), |(collateral, debt), leg| {
                (collateral + leg.collateral_usd, debt + leg.debt_usd)
            })
    }
}

/// Turns raw balances into USD legs and liquidation profiles.
pub struct PositionAggregator;

impl PositionAggregator {
    /// Values the leg of `position` in `market`.
    pub fn leg_status(
        position: &BorrowerPosition,
        market: &Address,
        markets: &HashMap<Address, Market>,
    ) -> LegStatus {
        let Some(price) = markets
            .get(market)
            .filter(|m| m.has_price())
            .map(|m| m.price_usd)
        else {
            return LegStatus::MissingPrice;
        };

        let Some((collateral_raw, borrow_raw)) =
            position.legs.get(market).and_then(|leg| leg.balances())
        else {
            return LegStatus::DecodeFailed;
        };

        let collateral_usd = math_helper::wad_to_usd(collateral_raw, price);
        let debt_usd = math_helper::wad_to_usd(borrow_raw, price);
        // balances past f64 range saturate, then overflow once priced
        if !collateral_usd.is_finite() || !debt_usd.is_finite() {
            return LegStatus::DecodeFailed;
        }

        LegStatus::Valued(ValuedLeg {
            address: position.address,
            market: *market,
            collateral_usd,
            debt_usd,
        })
    }

    /// USD legs of every market the user entered that has a price and decoded balances.
    ///
    /// Markets failing either condition are left out and counted, nothing is estimated in their
    /// place.
    pub fn valuate(
        position: &BorrowerPosition,
        markets: &HashMap<Address, Market>,
    ) -> Valuation {
        let mut valuation = Valuation::default();
        for market in &position.markets_entered {
            match Self::leg_status(position, market, markets) {
                LegStatus::Valued(leg) => valuation.legs.push(leg),
                LegStatus::MissingPrice => valuation.missing_price += 1,
                LegStatus::DecodeFailed => valuation.failed_decode += 1,
            }
        }
        valuation
    }

    /// Reduces the legs of one user to its liquidation profile
    ///
    /// # Arguments
    /// * `address` - User address
    /// * `legs` - Valued legs of the user
    /// * `stablecoin_markets` - Markets whose collateral doesn't move with the analysed asset
    ///
    /// # Returns
    /// * `Result<AggregatedUser, Exclusion>` - The profile, or why the user can't be liquidated by a price drop
    pub fn aggregate(
        address: Address,
        legs: &[ValuedLeg],
        stablecoin_markets: &HashSet<Address>,
    ) -> Result<AggregatedUser, Exclusion> {
        legs.iter()
            .fold(AggregatedUserBuilder::new(address), |builder, leg| {
                builder.add_leg(leg, stablecoin_markets.contains(&leg.market))
            })
            .build()
    }

    /// Values and aggregates every position, counting what had to be left out.
    #[instrument("AGGREGATOR", skip_all)]
    pub fn aggregate_all(
        positions: &HashMap<Address, BorrowerPosition>,
        markets: &HashMap<Address, Market>,
        stablecoin_markets: &HashSet<Address>,
    ) -> AggregationReport {
        let mut report = AggregationReport::default();

        let mut addresses: Vec<&Address> = positions.keys().collect();
        addresses.sort();

        for address in addresses {
            let Valuation {
                legs,
                missing_price,
                failed_decode,
            } = Self::valuate(&positions[address], markets);
            report.legs_missing_price += missing_price;
            report.legs_failed_decode += failed_decode;

            if legs.is_empty() {
                continue;
            }

            match Self::aggregate(*address, &legs, stablecoin_markets) {
                Ok(user) => report.users.push(user),
                Err(exclusion) => *report.exclusions.entry(exclusion).or_default() += 1,
            }
            report.valued_legs.insert(*address, legs);
        }

        if report.legs_missing_price > 0 || report.legs_failed_decode > 0 {
            warn!(
                "Dropped {} legs without price and {} legs with failed balances",
                report.legs_missing_price, report.legs_failed_decode
            );
        }
        info!(
            "Aggregated {} users out of {} positions, {} excluded",
            report.users.len(),
            positions.len(),
            report.excluded()
        );

        report
    }

    /// Share of the non-stable collateral held in markets of `reference_symbol`
    ///
    /// # Returns
    /// * `f64` - Ratio in [0, 1], 0 when there is no non-stable collateral at all
    pub fn collateral_share(
        report: &AggregationReport,
        markets: &HashMap<Address, Market>,
        reference_symbol: &str,
        stablecoin_markets: &HashSet<Address>,
    ) -> f64 {
        let breakdown = Self::collateral_breakdown(report);

        let mut reference = 0.0;
        let mut volatile = 0.0;
        for (market, collateral) in &breakdown {
            if stablecoin_markets.contains(market) {
                continue;
            }
            volatile += collateral;
            if markets
                .get(market)
                .is_some_and(|m| m.symbol.eq_ignore_ascii_case(reference_symbol))
            {
                reference += collateral;
            }
        }

        if volatile > 0.0 {
            reference / volatile
        } else {
            0.0
        }
    }

    /// Collateral in USD per market, over every valued leg.
    pub fn collateral_breakdown(report: &AggregationReport) -> HashMap<Address, f64> {
        let mut breakdown = HashMap::new();
        for leg in report.valued_legs.values().flatten() {
            *breakdown.entry(leg.market).or_insert(0.0) += leg.collateral_usd;
        }
        breakdown
    }
}
