use anyhow::{Context, Result};
use curve_database::CurveStore;
use debt_curve::{
    config::{LocalConfig, ReferenceData},
    debt_curve_service::DebtCurveService,
    utils,
};
use tracing::{error, info};

/// Main entry point of the Debt Curve ETL
///
/// This function performs the following steps:
/// 1. Initializes the pre-run environment
/// 2. Loads the reference data of the configured deployment
/// 3. Harvests positions, simulates the liquidation cascade and persists the curve
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let Some((local_config, store)) = init_pre_run().await? else {
        return Ok(());
    };

    info!("Starting the Debt Curve ETL");

    let reference = ReferenceData::load(
        &local_config.protocol_reference_path,
        &local_config.addresses_path,
        &local_config.protocol,
        &local_config.network,
    )?;

    match DebtCurveService::run(&local_config, &reference, &store).await {
        Ok(curve) => {
            info!("Debt curve persisted with {} points", curve.points().len());
            Ok(())
        }
        Err(e) => {
            let error_message = e
                .chain()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            error!("Debt curve run failed with error: {}", error_message);
            Err(anyhow::anyhow!("Debt curve run failed: {}", error_message))
        }
    }
}

/// Initializes the pre-run environment
///
/// This function performs the following steps:
/// 1. Loads environment variables from the `.env` file, when there is one
/// 2. Sets up the logger
/// 3. Loads the local configuration
/// 4. Resets the curve store if the reset argument is provided
/// 5. Creates the curve store directories
///
/// # Returns
/// * `Result<Option<(LocalConfig, CurveStore)>>` - None when the run stops after a reset
async fn init_pre_run() -> Result<Option<(LocalConfig, CurveStore)>> {
    dotenvy::dotenv().ok();
    utils::logger::setup_logger().context("Failed to setup logger")?;

    let local_config = LocalConfig::load_from_env().context("Failed to load configuration")?;
    let store = CurveStore::from_env();

    // read the first argument
    let args = std::env::args().collect::<Vec<String>>();
    if args.len() > 1 && args[1] == "reset" {
        info!("Resetting the curve store");
        store.reset().await?;
        info!("Curve store reset");
        return Ok(None);
    }

    store
        .init()
        .await
        .context("Failed to initialize the curve store")?;

    Ok(Some((local_config, store)))
}
