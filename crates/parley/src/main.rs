//! # parley
//!
//! Chat relay binary: loads settings, wires the in-memory collaborators and
//! serves `/ws` until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::SystemClock;
use parley_logging::LogFormat;
use parley_server::metrics::install_recorder;
use parley_server::{ChatServer, MirrorConfig, ServerConfig, ServerDeps};
use parley_settings::ParleySettings;

/// How long shutdown waits for connections and background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Parley chat relay.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley chat relay")]
struct Cli {
    /// Settings file (defaults to `$PARLEY_CONFIG` or `~/.parley/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: `compact` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<String>,

    /// Enable the LAN broadcast mirror (overrides settings).
    #[arg(long)]
    mirror: bool,

    /// Accept the public built-in JWT secret. Local development only.
    #[arg(long)]
    insecure_dev_secret: bool,
}

impl Cli {
    /// Resolve settings: file and environment layers, then flags.
    fn settings(&self) -> Result<ParleySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(parley_settings::settings_path);
        let mut settings = parley_settings::load_file_layer(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        parley_settings::apply_env_overrides(&mut settings);

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            settings.logging.format = LogFormat::parse(format)
                .with_context(|| format!("Unknown log format: {format}"))?;
        }
        if self.mirror {
            settings.mirror.enabled = true;
        }
        if self.insecure_dev_secret {
            settings.auth.allow_dev_secret = true;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;

    parley_logging::init_subscriber(&settings.logging.level, settings.logging.format);
    if settings.auth.uses_dev_secret() {
        tracing::warn!("using the built-in JWT secret; tokens can be forged by anyone");
    }
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let deps = ServerDeps::in_memory(&settings, Arc::new(SystemClock)).with_metrics(metrics);
    let mut server = ChatServer::new(ServerConfig::from_settings(&settings), deps);

    let mut handles = Vec::new();
    if settings.mirror.enabled {
        let config =
            MirrorConfig::from_settings(&settings.mirror).context("Invalid mirror settings")?;
        handles.extend(
            server
                .start_mirror(config)
                .await
                .context("Failed to start broadcast mirror")?,
        );
    }
    handles.extend(server.spawn_background());

    let (addr, serve) = server.listen().await.context("Failed to start server")?;
    handles.push(serve);
    tracing::info!(%addr, mirror = settings.mirror.enabled, "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let closed = server.begin_shutdown();
    tracing::info!(closed, "connections closing");
    let aborted = server.shutdown().drain(handles, SHUTDOWN_TIMEOUT).await;
    tracing::info!(aborted, "parley stopped");
    Ok(())
}
