pub mod curve_helper;
pub mod entities;
pub mod positions_snapshot_helper;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

/// Environment variable naming the curves directory.
pub const CURVES_DIR_VAR: &str = "CURVES_DIR";
pub const DEFAULT_CURVES_DIR: &str = "data/cached_curves";

/// Environment variable naming the positions snapshot directory.
pub const SNAPSHOTS_DIR_VAR: &str = "SNAPSHOTS_DIR";
pub const DEFAULT_SNAPSHOTS_DIR: &str = "data/users";

/// File-backed store for the debt curves and the positions snapshots written by each run.
///
/// Curves live under `curves_dir` as `<lowercase symbol>.json`, snapshots under `snapshots_dir`.
/// Every write replaces the previous file atomically, so readers only ever observe a complete
/// snapshot of the last finished run.
#[derive(Debug, Clone)]
pub struct CurveStore {
    curves_dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl CurveStore {
    pub fn new(curves_dir: impl Into<PathBuf>, snapshots_dir: impl Into<PathBuf>) -> Self {
        Self {
            curves_dir: curves_dir.into(),
            snapshots_dir: snapshots_dir.into(),
        }
    }

    /// Store located by `CURVES_DIR` and `SNAPSHOTS_DIR`, with the default directories for
    /// unset or empty variables.
    ///
    /// Both the ETL and the API open the store this way so they always agree on its location.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let dir = |name: &str, default: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self::new(
            dir(CURVES_DIR_VAR, DEFAULT_CURVES_DIR),
            dir(SNAPSHOTS_DIR_VAR, DEFAULT_SNAPSHOTS_DIR),
        )
    }

    /// Creates the storage directories if they don't exist yet.
    ///
    /// # Example
    /// ```no_run
    /// # async fn run() -> anyhow::Result<()> {
    /// let store = curve_database::CurveStore::new("data/cached_curves", "data/users");
    /// store.init().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn init(&self) -> Result<()> {
        for dir in [&self.curves_dir, &self.snapshots_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Removes every cached curve and snapshot, then recreates empty directories.
    pub async fn reset(&self) -> Result<()> {
        for dir in [&self.curves_dir, &self.snapshots_dir] {
            if tokio::fs::try_exists(dir).await? {
                info!("Removing {}", dir.display());
                tokio::fs::remove_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to remove directory {}", dir.display()))?;
            }
        }
        self.init().await
    }

    pub fn curves_dir(&self) -> &Path {
        &self.curves_dir
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    /// Path of the curve file for `asset`, addressed by its lowercase symbol.
    pub fn curve_path(&self, asset: &str) -> PathBuf {
        self.curves_dir
            .join(format!("{}.json", asset.trim().to_lowercase()))
    }
}

/// Writes `contents` next to `path` and renames it into place.
pub(crate) async fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    /// Unique scratch directory per test.
    pub fn scratch_dir(name: &str) -> PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "curve_database_{}_{}_{}",
            name,
            std::process::id(),
            id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_curve_path_uses_lowercase_symbol() {
        let store = CurveStore::new("/tmp/curves", "/tmp/users");
        assert_eq!(store.curve_path("ETH"), PathBuf::from("/tmp/curves/eth.json"));
        assert_eq!(store.curve_path(" wBTC "), PathBuf::from("/tmp/curves/wbtc.json"));
    }

    #[test]
    fn test_store_location_from_environment() {
        let defaults = CurveStore::from_lookup(|_| None);
        assert_eq!(defaults.curves_dir(), Path::new(DEFAULT_CURVES_DIR));
        assert_eq!(defaults.snapshots_dir(), Path::new(DEFAULT_SNAPSHOTS_DIR));

        let configured = CurveStore::from_lookup(|name| match name {
            CURVES_DIR_VAR => Some("/srv/curves".to_string()),
            SNAPSHOTS_DIR_VAR => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(configured.curves_dir(), Path::new("/srv/curves"));
        assert_eq!(configured.snapshots_dir(), Path::new(DEFAULT_SNAPSHOTS_DIR));
    }

    #[tokio::test]
    async fn test_reset_clears_existing_files() {
        let root = scratch_dir("reset");
        let store = CurveStore::new(root.join("curves"), root.join("users"));
        store.init().await.unwrap();
        tokio::fs::write(store.curve_path("eth"), b"[]").await.unwrap();

        store.reset().await.unwrap();

        assert!(tokio::fs::try_exists(store.curves_dir()).await.unwrap());
        assert!(!tokio::fs::try_exists(store.curve_path("eth")).await.unwrap());

        tokio::fs::remove_dir_all(root).await.unwrap();
    }
}
