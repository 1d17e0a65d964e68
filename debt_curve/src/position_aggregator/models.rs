use alloy::primitives::Address;

/// USD value of one market position of one user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuedLeg {
    pub address: Address,
    pub market: Address,
    pub collateral_usd: f64,
    pub debt_usd: f64,
}

/// Liquidation profile of one user, only built for users that pass every validity rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedUser {
    pub address: Address,
    pub total_collateral_usd: f64,
    pub total_debt_usd: f64,
    pub stable_collateral_usd: f64,
    /// Non-stable collateral, the part exposed to the price drop
    pub eth_collateral_usd: f64,
    /// Debt not covered by stable collateral
    pub liquidation_value: f64,
    /// Fraction of the non-stable collateral that covers the uncovered debt, in (0, 1)
    pub liquidation_perc: f64,
    pub net_value: f64,
}

/// Why a user didn't make it into the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exclusion {
    /// Stable collateral covers the whole debt
    NoLiquidationValue,
    NoVolatileCollateral,
    NonPositiveNetValue,
    /// A total overflowed or isn't a number
    NonFiniteValue,
}

#[derive(Debug, Clone)]
pub struct AggregatedUserBuilder {
    address: Address,
    total_collateral_usd: f64,
    total_debt_usd: f64,
    stable_collateral_usd: f64,
}

impl AggregatedUserBuilder {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            total_collateral_usd: 0.0,
            total_debt_usd: 0.0,
            stable_collateral_usd: 0.0,
        }
    }

    pub fn add_leg(mut self, leg: &ValuedLeg, is_stable: bool) -> Self {
        self.total_collateral_usd += leg.collateral_usd;
        self.total_debt_usd += leg.debt_usd;
        if is_stable {
            self.stable_collateral_usd += leg.collateral_usd;
        }
        self
    }

    pub fn build(self) -> Result<AggregatedUser, Exclusion> {
        if !self.total_collateral_usd.is_finite()
            || !self.total_debt_usd.is_finite()
            || !self.stable_collateral_usd.is_finite()
        {
            return Err(Exclusion::NonFiniteValue);
        }

        let liquidation_value = self.total_debt_usd - self.stable_collateral_usd;
        if liquidation_value <= 0.0 {
            return Err(Exclusion::NoLiquidationValue);
        }

        let eth_collateral_usd = self.total_collateral_usd - self.stable_collateral_usd;
        if eth_collateral_usd <= 0.0 {
            return Err(Exclusion::NoVolatileCollateral);
        }

        let net_value = self.total_collateral_usd - self.total_debt_usd;
        if net_value <= 0.0 {
            return Err(Exclusion::NonPositiveNetValue);
        }

        Ok(AggregatedUser {
            address: self.address,
            total_collateral_usd: self.total_collateral_usd,
            total_debt_usd: self.total_debt_usd,
            stable_collateral_usd: self.stable_collateral_usd,
            eth_collateral_usd,
            liquidation_value,
            liquidation_perc: liquidation_value / eth_collateral_usd,
            net_value,
        })
    }
}
