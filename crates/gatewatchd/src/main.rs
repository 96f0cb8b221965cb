//! gatewatchd: the gatewatch daemon.
//!
//! Single binary that assembles the health engine and its query API:
//! - Provider catalogues (static TOML files)
//! - One health service per enabled provider
//! - HTTP query layer
//!
//! # Usage
//!
//! ```text
//! gatewatchd serve --config /etc/gatewatch/gatewatch.toml
//! gatewatchd check --config /etc/gatewatch/gatewatch.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gatewatch_core::{parse_duration, GatewatchConfig, StaticProvider};
use gatewatch_health::{HealthMonitor, HealthService, SocketProbe, VpnChecker};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "gatewatchd", about = "gatewatch daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every enabled provider and serve the results.
    Serve {
        /// Path to gatewatch.toml.
        #[arg(long, env = "GATEWATCH_CONFIG", default_value = "gatewatch.toml")]
        config: PathBuf,

        /// Address to listen on, overriding `server.listen`.
        #[arg(long, env = "GATEWATCH_LISTEN")]
        listen: Option<SocketAddr>,

        /// Delay between rounds (e.g. "10m", "30s"), overriding `probe.interval`.
        #[arg(long, env = "GATEWATCH_INTERVAL")]
        interval: Option<String>,
    },

    /// Load and validate the configuration, then print it.
    Check {
        /// Path to gatewatch.toml.
        #[arg(long, env = "GATEWATCH_CONFIG", default_value = "gatewatch.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,gatewatchd=debug,gatewatch=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            listen,
            interval,
        } => {
            let config = load_config(&config, listen, interval)?;
            run_serve(config).await
        }
        Command::Check { config } => {
            let config = load_config(&config, None, None)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Read the config file, apply CLI overrides, and validate the result.
fn load_config(
    path: &Path,
    listen: Option<SocketAddr>,
    interval: Option<String>,
) -> anyhow::Result<GatewatchConfig> {
    let mut config = GatewatchConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?;

    if let Some(listen) = listen {
        config.server.listen = listen.to_string();
    }
    if let Some(interval) = interval {
        if parse_duration(&interval).is_none() {
            anyhow::bail!("invalid --interval {interval:?}");
        }
        config.probe.interval = interval;
    }

    config.validate()?;
    Ok(config)
}

/// Register one health service per enabled provider.
fn build_monitor(config: &GatewatchConfig) -> anyhow::Result<HealthMonitor> {
    let mut monitor = HealthMonitor::new();

    for entry in config.enabled_providers() {
        let provider = StaticProvider::from_file(&entry.name, &entry.path)?;
        let checker = VpnChecker::new(
            Some(Arc::new(provider)),
            SocketProbe,
            config.probe.clone(),
            config.tunnel.clone(),
        );
        let service = HealthService::new(&entry.name, Arc::new(checker), config.probe.interval());
        monitor.register(Arc::new(service));
        info!(provider = %entry.name, path = ?entry.path, "provider loaded");
    }

    if monitor.names().is_empty() {
        anyhow::bail!("no enabled providers configured");
    }
    Ok(monitor)
}

async fn run_serve(config: GatewatchConfig) -> anyhow::Result<()> {
    info!("gatewatch daemon starting");

    // ── Health services ────────────────────────────────────────

    let monitor = Arc::new(build_monitor(&config)?);
    monitor.start_all().await;
    info!(providers = ?monitor.names(), "health services running");

    // ── Query API ──────────────────────────────────────────────

    let router = gatewatch_api::build_router(Arc::clone(&monitor));
    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.listen {:?}: {e}", config.server.listen))?;

    info!(%addr, "query API starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
    });

    let served = server.await;

    // Round loops finish their in-flight round before exiting.
    monitor.stop_all().await;

    served?;
    info!("gatewatch daemon stopped");
    Ok(())
}
