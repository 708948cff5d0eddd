//! FanLedger - Financial Ledger Daemon CLI
//!
//! This is the main entry point for the FanLedger settlement daemon.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};

use fanledger::runtime::LedgerRuntime;
use fanledger_database::LedgerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address for the Prometheus scrape endpoint
    #[arg(long, default_value = "0.0.0.0:9184")]
    metrics_addr: String,

    /// Override the number of deposit-crediting workers
    #[arg(long)]
    deposit_workers: Option<usize>,

    /// Override the number of withdrawal-payout workers
    #[arg(long)]
    withdrawal_workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_tracing(&args.log_level)?;

    info!("🏦 Starting FanLedger v{}", env!("CARGO_PKG_VERSION"));

    // Prometheus exporter with its own scrape listener; counters fired by
    // the services land here.
    let metrics_addr: SocketAddr = args.metrics_addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    metrics::gauge!("fanledger_build_info", 1.0, "version" => env!("CARGO_PKG_VERSION"));
    info!("✅ Prometheus scrape endpoint live at http://{metrics_addr}/metrics");

    let mut config = LedgerConfig::from_env()?;
    if let Some(workers) = args.deposit_workers {
        config.workers.deposit_workers = workers;
    }
    if let Some(workers) = args.withdrawal_workers {
        config.workers.withdrawal_workers = workers;
    }
    config.validate()?;
    info!("✅ Configuration loaded ({})", config.environment);

    let runtime = LedgerRuntime::builder().config(config).build().await?;
    info!("✅ Ledger runtime online");

    wait_for_shutdown().await;

    info!("🛑 Shutting down FanLedger...");
    runtime.shutdown().await;
    info!("✅ FanLedger shut down gracefully");

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_appender = tracing_appender::rolling::daily("logs", "fanledger.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // The guard flushes the file appender on drop; it has to outlive main.
    Box::leak(Box::new(guard));

    let level_filter = match log_level.to_lowercase().as_str() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(EnvFilter::from_default_env().add_directive(level_filter.into()));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Blocks until the process receives Ctrl+C.
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("📡 Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("💥 Failed to listen for shutdown signal: {:?}", err);
        }
    }
}
