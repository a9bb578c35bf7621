//! taskgate broker daemon
//!
//! Runs the broker in front of an in-process session registry. Settings
//! and keys live under the user's configuration directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tg_broker::{Broker, BrokerConfig};
use tg_core::config::{
    self, fingerprint, AgentSettings, SettingsOverrides, UnauthenticatedPolicy,
};
use tg_core::{MemoryRegistry, TomlSettingsStore};

#[derive(Parser)]
#[command(name = "taskgate")]
#[command(about = "taskgate RPC broker daemon")]
#[command(version)]
struct Args {
    /// Path to the settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of client sessions to start
    #[arg(long)]
    clients: Option<u32>,

    /// Number of server sessions to start
    #[arg(long)]
    servers: Option<u32>,

    /// Local socket path
    #[arg(short, long)]
    socket_path: Option<PathBuf>,

    /// Additional endpoint to bind (tcp://host:port), repeatable
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    /// Worker pool size (defaults to available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Policy for peers that skip key authentication (reject, admit)
    #[arg(long)]
    unauthenticated: Option<UnauthenticatedPolicy>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("taskgate starting...");

    // Load settings; a broken file falls back to defaults
    let settings_path = args.config.clone().unwrap_or_else(config::default_settings_path);
    let stored = if settings_path.exists() {
        config::load_config::<AgentSettings>(&settings_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings from {:?}: {}", settings_path, e);
            AgentSettings::default()
        })
    } else {
        tracing::info!("No settings at {:?}, using defaults", settings_path);
        AgentSettings::default()
    };

    let overrides = SettingsOverrides {
        clients: args.clients,
        servers: args.servers,
        socket_path: args.socket_path,
        endpoints: args.endpoints,
        unauthenticated: args.unauthenticated,
        workers: args.workers,
    };
    let merged = stored.merge(&overrides, config::default_socket_path());
    config::save_config(&settings_path, &merged.persisted)
        .with_context(|| format!("Failed to save settings to {:?}", settings_path))?;

    // Load or generate keys
    let key_path = settings_path
        .parent()
        .map(|dir| dir.join("keys.json"))
        .unwrap_or_else(config::default_key_path);
    let keys = config::load_or_generate_keys(&key_path)
        .with_context(|| format!("Failed to load keys from {:?}", key_path))?;
    tracing::info!(
        "Expecting client key {}, key file {:?}",
        fingerprint(&keys.client.public),
        key_path
    );

    if merged.persisted.unauthenticated == UnauthenticatedPolicy::Admit {
        tracing::warn!("Peers without key authentication will be admitted");
    }

    let persisted = merged.persisted;
    let store = Arc::new(TomlSettingsStore::new(&settings_path, persisted.clone()));
    let mut broker_config = BrokerConfig::new(merged.socket_path, keys.client.public, store)
        .with_policy(persisted.unauthenticated)
        .with_sessions(persisted.clients, persisted.servers);
    broker_config.endpoints = persisted.endpoints;
    broker_config.workers = persisted.workers;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let registry = Arc::new(MemoryRegistry::new());
    Broker::new(broker_config, registry)
        .run(cancel)
        .await
        .context("Broker failed")?;

    tracing::info!("taskgate shutdown complete");
    Ok(())
}
