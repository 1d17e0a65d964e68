use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::{entities::PositionsSnapshot, write_atomically, CurveStore};

/// Path of the positions snapshot for a protocol deployment.
pub fn snapshot_path(store: &CurveStore, protocol: &str, network: &str) -> PathBuf {
    store.snapshots_dir().join(format!(
        "{}_{}.json",
        protocol.to_lowercase(),
        network.to_lowercase()
    ))
}

/// Writes the harvested positions of one run, replacing the previous dump
///
/// # Arguments
/// * `store` - Curve store
/// * `snapshot` - Positions and market status of the run
///
/// # Returns
/// * `Result<PathBuf>` - Location of the written file
pub async fn save_positions_snapshot(
    store: &CurveStore,
    snapshot: &PositionsSnapshot,
) -> Result<PathBuf> {
    let path = snapshot_path(store, &snapshot.protocol, &snapshot.network);
    let contents = serde_json::to_vec_pretty(snapshot)
        .context("Failed to serialize positions snapshot")?;
    write_atomically(&path, &contents).await?;

    info!(
        "Saved {} users and {} markets at block {} to {}",
        snapshot.users.len(),
        snapshot.markets.len(),
        snapshot.block_number,
        path.display()
    );

    Ok(path)
}
