use std::collections::HashMap;

use alloy::primitives::{Address, U256};

/// A lending market of the protocol with its current USD price.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub address: Address,
    pub symbol: String,
    /// None for native-coin markets
    pub underlying: Option<Address>,
    pub price_usd: f64,
    pub borrowable: bool,
    pub supplyable: bool,
}

impl Market {
    pub fn has_price(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd > 0.0
    }
}

/// Result of decoding one balance sub-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegValue {
    Decoded(U256),
    Failed,
}

impl LegValue {
    pub fn decoded(&self) -> Option<U256> {
        match self {
            LegValue::Decoded(value) => Some(*value),
            LegValue::Failed => None,
        }
    }
}

/// Raw balances of one user in one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionLeg {
    pub market: Address,
    pub collateral_raw: LegValue,
    pub borrow_raw: LegValue,
}

impl PositionLeg {
    /// Both raw balances, when both decoded.
    pub fn balances(&self) -> Option<(U256, U256)> {
        Some((self.collateral_raw.decoded()?, self.borrow_raw.decoded()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowerPosition {
    pub address: Address,
    /// Markets entered, in the order the comptroller returns them; empty when that call failed
    pub markets_entered: Vec<Address>,
    pub legs: HashMap<Address, PositionLeg>,
}

impl BorrowerPosition {
    pub fn failed_legs(&self) -> usize {
        self.legs
            .values()
            .filter(|leg| leg.balances().is_none())
            .count()
    }
}
