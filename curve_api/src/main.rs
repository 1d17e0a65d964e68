mod handlers;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use curve_database::CurveStore;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_PORT: u16 = 8080;

fn setup_logger() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .context("Failed to initialize the logger")?;
    Ok(())
}

/// Listening port from `PORT`, 8080 when unset or empty.
fn load_port() -> Result<u16> {
    match std::env::var("PORT") {
        Ok(port) if !port.trim().is_empty() => port
            .trim()
            .parse::<u16>()
            .with_context(|| format!("{} is not a valid PORT", port)),
        _ => Ok(DEFAULT_PORT),
    }
}

fn router(store: Arc<CurveStore>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/getAccumulatedDebt", get(handlers::get_accumulated_debt))
        .with_state(store)
}

/// Serves the persisted debt curves
///
/// The API only reads what the ETL last wrote, curves are never computed here.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logger()?;

    let store = CurveStore::from_env();
    store.init().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], load_port()?));
    info!("Starting curve API on {}", addr);

    axum::Server::bind(&addr)
        .serve(router(Arc::new(store)).into_make_service())
        .await?;
    Ok(())
}
