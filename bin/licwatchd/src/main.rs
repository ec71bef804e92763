//! ---
//! lw_section: "03-daemon"
//! lw_subsection: "binary"
//! lw_type: "source"
//! lw_scope: "code"
//! lw_description: "Binary entrypoint for the licwatch daemon."
//! lw_version: "v0.0.0-prealpha"
//! lw_owner: "tbd"
//! ---
mod config;
mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use licwatch_core::{init_tracing, License, LicenseConfig, LicenseMetrics, LicenseWatcher};
use licwatch_licensing::{LicenseEngine, SignedLicenseEngine, SystemClock, Validator};
use prometheus::Registry;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{DaemonConfig, LoadedConfig};
use crate::http::{spawn_http_server, HttpState};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("licwatch ", env!("CARGO_PKG_VERSION"), " (built ", env!("VERGEN_BUILD_TIMESTAMP"), ")"),
    about = "licwatch license watcher daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the license watcher")]
    Run,
    #[command(about = "Validate a license file and print its entitlements")]
    Inspect {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/licwatchd.toml"));
    candidates.push(PathBuf::from("/etc/licwatch/licwatchd.toml"));

    let loaded = DaemonConfig::load_with_source(&candidates)?;
    init_tracing("licwatchd", &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(loaded).await?,
        Commands::Inspect { path } => inspect(&loaded.config, &path)?,
    }
    Ok(())
}

/// Build timestamp embedded at compile time.
fn build_timestamp() -> Option<DateTime<Utc>> {
    option_env!("VERGEN_BUILD_TIMESTAMP")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn license_config(config: &DaemonConfig) -> LicenseConfig {
    LicenseConfig {
        build_date: config.license.build_date.or_else(build_timestamp),
        ..config.license.clone()
    }
}

fn engine(config: &DaemonConfig) -> Result<SignedLicenseEngine> {
    let settings = config
        .engine
        .settings(Arc::new(SystemClock))
        .context("invalid license engine configuration")?;
    Ok(SignedLicenseEngine::new(settings))
}

async fn run_daemon(loaded: LoadedConfig) -> Result<()> {
    let LoadedConfig { config, source } = loaded;
    let engine = engine(&config)?;
    let registry = Arc::new(Registry::new());
    let metrics = LicenseMetrics::new(registry.clone())?;

    let watcher = LicenseWatcher::new(&license_config(&config), &engine)
        .context("failed to initialize license watcher")?
        .with_metrics(metrics);
    let watcher = Arc::new(watcher);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor = watcher.start(shutdown_rx)?;

    let http_server = if config.http.enabled {
        let state = Arc::new(HttpState::new(watcher.clone(), registry.clone()));
        Some(spawn_http_server(state, config.http.listen)?)
    } else {
        info!("http server disabled by configuration");
        None
    };

    let mut hangup = Hangup::new()?;
    info!("daemon running; waiting for termination signal");
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("ctrl-c received; shutting down");
                break;
            }
            _ = hangup.recv() => reload(&watcher, &config, source.as_deref()),
        }
    }

    let _ = shutdown_tx.send(());
    monitor.await.context("license monitor task failed")?;

    if let Some(server) = http_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn reload(watcher: &LicenseWatcher, current: &DaemonConfig, source: Option<&Path>) {
    info!("hangup received; reloading license");
    let config = match source {
        Some(path) => match DaemonConfig::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to reload configuration; keeping current license");
                return;
            }
        },
        None => current.clone(),
    };
    match watcher.reload(&license_config(&config)) {
        Ok(()) => {
            let license = watcher.current_license();
            info!(license_id = %license.license_id, "license reloaded");
        }
        Err(err) => warn!(error = %err, "license reload failed; keeping current license"),
    }
}

fn inspect(config: &DaemonConfig, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read license file {}", path.display()))?;
    let build_date = license_config(config)
        .build_date
        .context("build date is unset; set [license].build_date")?;
    let validator = engine(config)?.validator(build_date)?;
    let details = validator
        .validate(raw.trim())
        .with_context(|| format!("failed to validate license {}", path.display()))?;
    let license = License::try_from(&details)
        .with_context(|| format!("failed to convert license {}", path.display()))?;

    println!("License {} issued to {}", license.license_id, license.customer_id);
    println!("Product {}", license.product);
    println!("Valid from {}", license.start_time);
    println!("Expires at {}", license.expiration_time);
    println!("Terminates at {}", license.termination_time);
    println!("Features:");
    for (feature, enabled) in license.features.to_map() {
        println!("  {:<24} {}", feature, enabled);
    }
    Ok(())
}

#[cfg(unix)]
struct Hangup(signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        let signal = signal::unix::signal(signal::unix::SignalKind::hangup())
            .context("failed to install SIGHUP handler")?;
        Ok(Self(signal))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
