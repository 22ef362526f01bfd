use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use vigil::clock::{Clock, SystemClock};
use vigil::config::VigilConfig;
use vigil::grpc::GrpcServer;
use vigil::ratelimit::{CadenceTracker, RateLimiterRegistry};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Adaptive rate limiting service for Envoy Proxy.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gRPC listen address
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Vigil Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = VigilConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }
    info!(
        grpc_addr = %config.server.grpc_addr,
        policies = config.policies.len(),
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(RateLimiterRegistry::from_settings(
        &config.policies,
        &config.limiter,
        Arc::clone(&clock),
    )?);
    let cadence = Arc::new(CadenceTracker::new());

    spawn_sweeper(&config, Arc::clone(&registry), Arc::clone(&cadence), clock);

    let grpc_server = GrpcServer::new(config.server.grpc_addr, registry, cadence);
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Vigil Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically drop expired records and stale cadence entries.
fn spawn_sweeper(
    config: &VigilConfig,
    registry: Arc<RateLimiterRegistry>,
    cadence: Arc<CadenceTracker>,
    clock: Arc<dyn Clock>,
) {
    let interval = config.limiter.sweep_interval();
    let retention = config.limiter.cadence_retention();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let records = registry.purge_expired();
            let clients = cadence.prune(clock.now_ms(), retention);
            debug!(
                expired_records = records,
                stale_clients = clients,
                "Sweep completed"
            );
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
