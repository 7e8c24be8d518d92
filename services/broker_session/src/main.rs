//! Broker session entry point
//!
//! Opens one gateway session from a config file, logs every configured
//! event type as it arrives, and closes cleanly on Ctrl+C.

use anyhow::{Context, Result};
use broker_config::BrokerConfig;
use clap::Parser;
use network::BrokerConnection;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/broker.toml")]
    config: PathBuf,

    /// Send one command after connecting, e.g. `ProtoOAVersionReq`
    #[arg(long)]
    command: Option<String>,

    /// JSON fields for `--command`
    #[arg(long, default_value = "{}")]
    fields: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BrokerConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting broker session");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(endpoint = %config.gateway.endpoint(), tls = config.gateway.tls, "Configuration loaded");

    let connection = BrokerConnection::from_config(&config);
    connection
        .open()
        .await
        .with_context(|| format!("Failed to open session to {}", config.gateway.endpoint()))?;

    for name in &config.monitor.events {
        let subscribed = connection.on(name, |event| {
            let fields = serde_json::Value::Object(event.fields.clone());
            info!(
                payload_name = %event.payload_name,
                payload_type = event.payload_type,
                client_msg_id = ?event.client_msg_id,
                %fields,
                "Event received"
            );
        });
        if let Err(e) = subscribed {
            warn!(event = %name, error = %e, "Cannot monitor event type");
        }
    }

    if let Some(command) = args.command.as_deref() {
        let fields: serde_json::Value =
            serde_json::from_str(&args.fields).context("--fields is not valid JSON")?;
        match connection.send_command(command, fields, None).await {
            Ok(reply) => info!(command, reply = %serde_json::Value::Object(reply), "Command answered"),
            Err(e) => warn!(command, error = %e, category = e.category(), "Command failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");

    connection.close().await.context("Failed to close session")?;
    Ok(())
}
