use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::{entities::CurvePoint, write_atomically, CurveStore};

/// Persists the curve of `asset`, replacing any previous snapshot.
///
/// The curve is validated before anything touches the disk: an empty curve, keys that are not
/// strictly ascending, a decreasing liquidation total, or a price change or slippage outside
/// (0, 1] fail the write and leave the previous snapshot in place.
///
/// # Arguments
/// * `store` - Curve store
/// * `asset` - Asset symbol, any case
/// * `curve` - Curve points ordered by price change
pub async fn save_curve(store: &CurveStore, asset: &str, curve: &[CurvePoint]) -> Result<()> {
    validate_curve(curve).with_context(|| format!("Refusing to persist curve for {}", asset))?;

    let path = store.curve_path(asset);
    let contents = serde_json::to_vec_pretty(curve)?;
    write_atomically(&path, &contents).await?;

    info!(
        "Saved curve for {} with {} points to {}",
        asset,
        curve.len(),
        path.display()
    );

    Ok(())
}

/// Loads the curve of `asset`
///
/// # Returns
/// * `Result<Option<Vec<CurvePoint>>>` - None if no curve was ever persisted for the asset
pub async fn load_curve(store: &CurveStore, asset: &str) -> Result<Option<Vec<CurvePoint>>> {
    let path = store.curve_path(asset);
    if !tokio::fs::try_exists(&path).await? {
        debug!("No curve found at {}", path.display());
        return Ok(None);
    }

    let contents = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let curve: Vec<CurvePoint> = serde_json::from_slice(&contents)
        .with_context(|| format!("Malformed curve file {}", path.display()))?;

    Ok(Some(curve))
}

/// Ceiling lookup: the first point whose price change is at least `price_drop`.
///
/// This is a step lookup, no interpolation happens between neighbouring points. A drop larger
/// than the last bucket has no point and yields `None`.
pub fn accumulated_debt_at(curve: &[CurvePoint], price_drop: f64) -> Option<&CurvePoint> {
    curve.iter().find(|point| point.price_change >= price_drop)
}

/// Checks the ordering and range invariants of a curve: price changes and slippages in (0, 1],
/// strictly ascending price changes, non-decreasing liquidations.
pub fn validate_curve(curve: &[CurvePoint]) -> Result<()> {
    if curve.is_empty() {
        bail!("curve is empty");
    }

    for point in curve {
        if !point.price_change.is_finite()
            || !point.total_liquidation.is_finite()
            || !point.liquidation_slippage.is_finite()
        {
            bail!("curve point {:?} is not finite", point);
        }
        if point.price_change <= 0.0 || point.price_change > 1.0 {
            bail!("price change {} out of (0, 1]", point.price_change);
        }
        if point.liquidation_slippage <= 0.0 || point.liquidation_slippage > 1.0 {
            bail!("slippage {} out of (0, 1]", point.liquidation_slippage);
        }
    }

    for pair in curve.windows(2) {
        if pair[1].price_change <= pair[0].price_change {
            bail!(
                "price change {} does not follow {} in strictly ascending order",
                pair[1].price_change,
                pair[0].price_change
            );
        }
        if pair[1].total_liquidation < pair[0].total_liquidation {
            bail!(
                "total liquidation decreases from {} to {}",
                pair[0].total_liquidation,
                pair[1].total_liquidation
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    fn point(price_change: f64, total_liquidation: f64, liquidation_slippage: f64) -> CurvePoint {
        CurvePoint {
            price_change,
            total_liquidation,
            liquidation_slippage,
        }
    }

    fn sample_curve() -> Vec<CurvePoint> {
        vec![
            point(0.1, 50.0, 0.99),
            point(0.3, 150.0, 0.97),
            point(0.5, 175.0, 0.96),
        ]
    }

    #[test]
    fn test_accumulated_debt_is_a_ceiling_lookup() {
        let curve = sample_curve();

        assert_eq!(accumulated_debt_at(&curve, 0.0), Some(&curve[0]));
        assert_eq!(accumulated_debt_at(&curve, 0.1), Some(&curve[0]));
        assert_eq!(accumulated_debt_at(&curve, 0.2), Some(&curve[1]));
        assert_eq!(accumulated_debt_at(&curve, 0.3), Some(&curve[1]));
        assert_eq!(accumulated_debt_at(&curve, 0.45), Some(&curve[2]));
    }

    #[test]
    fn test_accumulated_debt_beyond_last_bucket_is_none() {
        let curve = sample_curve();

        assert_eq!(accumulated_debt_at(&curve, 0.5001), None);
        assert_eq!(accumulated_debt_at(&curve, 1.0), None);
        assert_eq!(accumulated_debt_at(&[], 0.1), None);
    }

    #[test]
    fn test_validate_rejects_broken_curves() {
        assert!(validate_curve(&sample_curve()).is_ok());
        assert!(validate_curve(&[]).is_err());
        assert!(validate_curve(&[point(0.1, 10.0, 0.9), point(0.1, 20.0, 0.8)]).is_err());
        assert!(validate_curve(&[point(0.2, 10.0, 0.9), point(0.1, 20.0, 0.8)]).is_err());
        assert!(validate_curve(&[point(0.1, 20.0, 0.9), point(0.2, 10.0, 0.8)]).is_err());
        assert!(validate_curve(&[point(0.1, 20.0, 0.0)]).is_err());
        assert!(validate_curve(&[point(f64::NAN, 20.0, 0.5)]).is_err());
        assert!(validate_curve(&[point(0.0, 20.0, 0.5)]).is_err());
        assert!(validate_curve(&[point(1.5, 20.0, 0.5)]).is_err());
        assert!(validate_curve(&[point(1.0, 20.0, 0.5)]).is_ok());
    }

    #[tokio::test]
    async fn test_save_then_load_curve() {
        let root = scratch_dir("save_load");
        let store = CurveStore::new(root.join("curves"), root.join("users"));
        store.init().await.unwrap();

        save_curve(&store, "ETH", &sample_curve()).await.unwrap();

        let loaded = load_curve(&store, "eth").await.unwrap();
        assert_eq!(loaded, Some(sample_curve()));
        assert!(!tokio::fs::try_exists(store.curve_path("eth").with_extension("json.tmp"))
            .await
            .unwrap());

        let raw = tokio::fs::read_to_string(store.curve_path("eth")).await.unwrap();
        assert!(raw.contains("\"priceChange\""));
        assert!(raw.contains("\"totalLiquidation\""));
        assert!(raw.contains("\"liquidationSlippage\""));

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_curve_keeps_previous_snapshot() {
        let root = scratch_dir("fail_closed");
        let store = CurveStore::new(root.join("curves"), root.join("users"));
        store.init().await.unwrap();

        save_curve(&store, "eth", &sample_curve()).await.unwrap();
        let broken = vec![point(0.3, 10.0, 0.9), point(0.2, 20.0, 0.8)];
        assert!(save_curve(&store, "eth", &broken).await.is_err());

        let loaded = load_curve(&store, "eth").await.unwrap();
        assert_eq!(loaded, Some(sample_curve()));

        tokio::fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_curve_is_none() {
        let root = scratch_dir("missing");
        let store = CurveStore::new(root.join("curves"), root.join("users"));

        assert_eq!(load_curve(&store, "btc").await.unwrap(), None);
    }
}
