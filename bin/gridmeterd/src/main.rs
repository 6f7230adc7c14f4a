//! ---
//! meter_section: "01-core-functionality"
//! meter_subsection: "binary"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Binary entrypoint for the gridmeter daemon."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gridmeter_api::{ApiServerBuilder, ApiState, StaticTokenIdentity};
use gridmeter_billing::BillingEngine;
use gridmeter_common::config::AppConfig;
use gridmeter_common::{init_tracing, new_registry};
use gridmeter_core::{FsStorage, MeterStore, Storage};
use gridmeter_hub::{BroadcastHub, HubMetrics};
use gridmeter_persistence::StorageMetrics;
use gridmeter_sim::IngestionDriver;
use tokio::signal;
use tracing::{info, warn};

const HUB_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Gridmeter daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the API listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Disable the synthetic reading simulation loop")]
    no_simulation: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/gridmeter.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.api.listen = listen;
    }
    if cli.no_simulation {
        config.simulation.enabled = false;
    }

    init_tracing("gridmeterd", &config.logging)?;
    info!(source = %loaded.source.display(), "configuration loaded");

    let registry = config.metrics.enabled.then(new_registry);

    let mut fs_storage = FsStorage::open(&config.storage.data_dir)?;
    if let Some(registry) = &registry {
        fs_storage = fs_storage.with_metrics(StorageMetrics::new(registry.clone())?);
    }
    let storage: Arc<dyn Storage> = Arc::new(fs_storage);

    let store = Arc::new(MeterStore::open(storage.clone())?);
    let mut hub = BroadcastHub::new(HUB_QUEUE_CAPACITY);
    if let Some(registry) = &registry {
        hub = hub.with_metrics(HubMetrics::new(registry)?);
    }
    let hub = Arc::new(hub);

    let billing = Arc::new(BillingEngine::open(
        store.clone(),
        hub.clone(),
        storage,
        config.billing.clone(),
    )?);

    let driver = Arc::new(IngestionDriver::new(
        store.clone(),
        hub.clone(),
        config.simulation.random_seed,
        config.simulation.tick_interval,
    ));
    let driver_handle = if config.simulation.enabled {
        Some(driver.spawn())
    } else {
        info!("simulation loop disabled");
        None
    };

    let api_handle = if config.api.enabled {
        let state = Arc::new(ApiState {
            store,
            billing,
            driver,
            hub,
            identity: Arc::new(StaticTokenIdentity::from_config(&config.api.tokens)),
            metrics: registry,
        });
        Some(
            ApiServerBuilder::new(config.api.listen, state)
                .spawn()
                .await?,
        )
    } else {
        warn!("api surface disabled; the daemon is only accruing simulated readings");
        None
    };

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    if let Some(handle) = driver_handle {
        handle.shutdown().await;
    }
    if let Some(handle) = api_handle {
        handle.shutdown().await?;
    }
    info!("gridmeterd stopped");
    Ok(())
}
