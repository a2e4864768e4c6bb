use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::watch;

use tickvault::config::Config;
use tickvault::store::TickStore;
use tickvault::sync::SyncSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set TICKVAULT_CONFIG or provide config/default.toml");
            std::process::exit(1);
        }
    };

    // Log to a file; stdout stays quiet for service supervisors.
    let log_file = std::fs::File::create(&config.logging.file)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                config
                    .logging
                    .level
                    .parse()
                    .unwrap_or_else(|_| "info".parse().unwrap())
            }),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .json()
        .init();

    let instruments = config.binance.tracked_instruments()?;
    tracing::info!(
        db_path = %config.store.db_path,
        instruments = instruments.len(),
        archive_url = %config.binance.archive_base_url,
        "Starting tickvault"
    );

    let store = TickStore::open(Path::new(&config.store.db_path))?;
    for instrument in &instruments {
        store.ensure_trade_table(instrument)?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = SyncSupervisor::new(store, config)?;
    let supervisor_task = supervisor.start(shutdown_rx);

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Ctrl+C received");
    let _ = shutdown_tx.send(true);

    supervisor_task
        .await
        .context("sync supervisor task failed")?;
    tracing::info!("tickvault stopped");
    Ok(())
}
