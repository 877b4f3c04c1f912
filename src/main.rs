//! # salon
//!
//! Chat relay binary: loads settings, opens the room directory and serves
//! `/ws/chat/{room}/` until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use salon_core::Pbkdf2Hasher;
use salon_server::config::ServerConfig;
use salon_server::server::SalonServer;
use salon_settings::{expand_home, SalonSettings};
use salon_store::{Database, RoomRepo};
use salon_telemetry::TelemetryConfig;

/// Room-based WebSocket chat relay.
#[derive(Parser, Debug)]
#[command(name = "salon", about = "Room-based WebSocket chat relay")]
struct Cli {
    /// Settings file (defaults to `~/.salon/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` room database (overrides settings).
    #[arg(long)]
    database: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<SalonSettings> {
        let path = self.config.clone().unwrap_or_else(salon_settings::settings_path);
        let mut settings = salon_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(database) = &self.database {
            settings.database.path = database.display().to_string();
        }
        Ok(settings)
    }
}

fn server_config(settings: &SalonSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_message_size: server.max_message_size,
        send_queue_capacity: server.send_queue_capacity,
        max_dropped_messages: server.max_dropped_messages,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        heartbeat_timeout_secs: server.heartbeat_timeout_secs,
        shutdown_timeout_secs: server.shutdown_timeout_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    let logging = &settings.logging;
    let telemetry = TelemetryConfig::from_names(
        &logging.level,
        logging
            .module_levels
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        logging.json,
    )?;
    salon_telemetry::init_telemetry(&telemetry)?;

    tracing::info!("Starting salon chat relay");

    let db_path = expand_home(&settings.database.path);
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let rooms = Arc::new(RoomRepo::new(db));

    let hasher = Arc::new(Pbkdf2Hasher::new(settings.auth.pbkdf2_iterations)?);
    let metrics_handle = salon_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = SalonServer::new(server_config(&settings), rooms, hasher).with_metrics(metrics_handle);
    let (addr, serve_handle) = server.listen().await.context("Failed to bind listener")?;
    tracing::info!(%addr, "salon ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    if !server.shutdown_gracefully().await {
        tracing::warn!("sessions still running at shutdown timeout");
    }
    let _ = serve_handle.await;
    Ok(())
}
