//! Planning Gateway Daemon - HTTP Front Door for Fiber Network Planning
//!
//! This is the main entry point for the planning gateway. It accepts
//! planning requests over HTTP, serves repeated requests from the result
//! cache, and dispatches new ones to the smallest backend tier that can
//! handle the network.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:5000, tiers on localhost:8000/8001)
//! planning-gateway
//!
//! # Custom listener
//! planning-gateway --host 127.0.0.1 --port 8080
//!
//! # With config file
//! planning-gateway --config /etc/fiber-planning/gateway.toml
//!
//! # Verbose logging
//! RUST_LOG=debug planning-gateway
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Reload the tier table (hot reload)

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gateway_core::config::{self, ConfigOverrides, GatewayConfig};
use gateway_core::{BackendSet, FileFeedbackSink, GatewayService};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use server::AppState;

/// Planning Gateway - capability-aware dispatch for fiber planning tiers
///
/// Listener and feedback flags take priority over the environment and the
/// config file, which the core config loader handles.
#[derive(Parser, Debug)]
#[command(name = "planning-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Interface to listen on
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory feedback files are written to
    #[arg(long, value_name = "DIR")]
    feedback_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(host) = &self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(dir) = &self.feedback_dir {
            overrides = overrides.with_feedback_dir(dir.clone());
        }
        overrides
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(config::default_config_path)
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "gateway_daemon={level},gateway_core={level},tower_http={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Load configuration with CLI overrides applied on top
fn load(args: &Args) -> Result<GatewayConfig> {
    let mut config = config::load_config_from_path(args.config_path())
        .context("Failed to load gateway configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid gateway configuration")?;
    Ok(config)
}

/// Re-read the tier table and swap it into the running dispatcher
///
/// Cache and listener settings are fixed for the life of the process.
fn reload_tiers(args: &Args, gateway: &GatewayService) -> Result<u64> {
    let config = load(args)?;
    let backends =
        BackendSet::http_for(&config.tiers).context("Failed to build tier clients")?;
    let version = gateway
        .dispatcher()
        .reload(config.tiers, backends)
        .context("Rejected tier table")?;
    Ok(version)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Planning gateway starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config = load(&args)?;
    info!(source = %config.source(), config_file = ?config.config_file_path, "Configuration loaded");
    for tier in &config.tiers {
        info!(
            tier = %tier.id,
            endpoint = %tier.endpoint,
            max_sites = tier.max_sites,
            timeout_secs = tier.timeout.as_secs(),
            enabled = tier.enabled,
            "Tier configured"
        );
    }

    let backends = BackendSet::http_for(&config.tiers).context("Failed to build tier clients")?;
    let gateway = Arc::new(
        GatewayService::from_config(&config, backends).context("Invalid tier table")?,
    );
    let sweeper = gateway.cache().spawn_sweeper(config.cache.sweep_interval);
    let feedback = Arc::new(FileFeedbackSink::new(&config.feedback_dir));
    info!(feedback_dir = ?config.feedback_dir, "Feedback sink ready");

    // Setup signal handlers
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let signal_gateway = Arc::clone(&gateway);
    let args = Arc::new(args);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating shutdown");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating shutdown");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading tier table");
                    // Config loading reads files; keep it off the signal task
                    let args = Arc::clone(&args);
                    let gateway = Arc::clone(&signal_gateway);
                    match tokio::task::spawn_blocking(move || reload_tiers(&args, &gateway)).await {
                        Ok(Ok(version)) => info!(version, "Tier table reloaded"),
                        Ok(Err(e)) => warn!(error = %format!("{e:#}"), "Reload failed, keeping current tiers"),
                        Err(e) => error!(error = %e, "Reload task panicked, keeping current tiers"),
                    }
                }
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(address = %address, "Listening");

    let app = server::router(AppState::new(Arc::clone(&gateway), feedback));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server failed");

    info!("Shutting down...");
    sweeper.abort();

    match result {
        Ok(()) => {
            info!("Planning gateway stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Gateway stopped with error");
            Err(e)
        }
    }
}
