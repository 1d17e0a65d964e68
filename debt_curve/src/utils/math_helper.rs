use alloy::primitives::U256;

/// Fixed-point precision of cToken balances and prices.
pub const WAD_DECIMALS: u8 = 18;

/// Converts a fixed-point integer with `precision` decimals to `f64`.
///
/// Values whose integer part doesn't fit in `u128` saturate to `f64::MAX`.
pub fn divide_by_precision_f64(value: U256, precision: u8) -> f64 {
    let scale = U256::from(10).pow(U256::from(precision));

    let (quotient, remainder) = value.div_rem(scale);

    let (Ok(quotient), Ok(remainder), Ok(scale)) = (
        u128::try_from(quotient),
        u128::try_from(remainder),
        u128::try_from(scale),
    ) else {
        return f64::MAX;
    };

    quotient as f64 + remainder as f64 / scale as f64
}

/// USD value of an 18-decimal raw balance: `raw * price / 1e18`.
pub fn wad_to_usd(raw: U256, price: f64) -> f64 {
    divide_by_precision_f64(raw, WAD_DECIMALS) * price
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
