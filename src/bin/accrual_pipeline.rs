//! accrual-pipeline: order-accrual reconciliation worker
//!
//! ## Architecture
//! ```text
//! [order store] --pending--> [accrual-pipeline] --GET /api/orders/{n}--> [accrual service]
//!       ^                            |
//!       +-------- status/balance ----+
//! ```
//!
//! ## Configuration
//! - config.yaml, LOYALTY_CONFIG, LOYALTY__SECTION__KEY: layered settings
//! - ACCRUAL_SYSTEM_ADDRESS: accrual service base address
//! - DATABASE_URI: PostgreSQL URI (selects the postgres backend)
//! - LOYALTY_LOG / LOYALTY_LOG_FORMAT: log filter and format
//!
//! Flags override all of the above.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use loyalty_accrual::config::Config;
use loyalty_accrual::oracle::HttpAccrualClient;
use loyalty_accrual::pipeline::AccrualPipeline;
use loyalty_accrual::storage::init_storage;
use loyalty_accrual::utils::bootstrap::init_tracing;

/// Reconcile submitted orders with the accrual service
#[derive(Parser, Debug)]
#[command(name = "accrual-pipeline")]
#[command(about = "Reconcile submitted orders with the accrual service", long_about = None)]
struct Args {
    /// Accrual service base address
    #[arg(short = 'r', long = "accrual-address", value_name = "ADDRESS")]
    accrual_address: Option<String>,

    /// PostgreSQL connection URI
    #[arg(short = 'd', long = "database-uri", value_name = "URI")]
    database_uri: Option<String>,

    /// Configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<String>,

    /// Number of concurrent oracle workers
    #[arg(short = 'w', long = "workers", value_name = "COUNT")]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(address) = args.accrual_address {
        config.accrual.address = address;
    }
    if let Some(uri) = args.database_uri {
        config.use_postgres(uri);
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    config.validate()?;

    let store = init_storage(&config.storage).await?;
    let oracle = Arc::new(HttpAccrualClient::new(&config.accrual)?);
    info!(accrual = %oracle.base(), storage = %config.storage.storage_type, "accrual-pipeline starting");

    let handle = AccrualPipeline::new(store, oracle, config.pipeline).spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
