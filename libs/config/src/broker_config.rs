//! Broker Session Configuration
//!
//! Loads a TOML file and layers `BROKER__*` environment overrides on top.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Full configuration of one broker session
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    pub gateway: GatewayConfig,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Gateway endpoint
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Message catalog sources
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaConfig {
    pub files: Vec<String>,
    #[serde(default)]
    pub include_dirs: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_message")]
    pub heartbeat_message: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Message types the session binary logs as they arrive
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub events: Vec<String>,
}

fn default_tls() -> bool {
    defaults::gateway::TLS
}

fn default_connect_timeout_ms() -> u64 {
    defaults::gateway::CONNECT_TIMEOUT_MS
}

fn default_read_buffer_size() -> usize {
    defaults::gateway::READ_BUFFER_SIZE
}

fn default_heartbeat_interval_secs() -> u64 {
    defaults::session::HEARTBEAT_INTERVAL_SECS
}

fn default_heartbeat_message() -> String {
    defaults::session::HEARTBEAT_MESSAGE.to_string()
}

fn default_command_timeout_ms() -> u64 {
    defaults::session::COMMAND_TIMEOUT_MS
}

fn default_max_frame_size() -> usize {
    defaults::session::MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    defaults::logging::LEVEL.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_message: default_heartbeat_message(),
            command_timeout_ms: default_command_timeout_ms(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SessionConfig {
    /// Heartbeat period, `None` when disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// Reply deadline, `None` when disabled
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

impl SchemaConfig {
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(PathBuf::from).collect()
    }

    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.include_dirs.iter().map(PathBuf::from).collect()
    }
}

impl BrokerConfig {
    /// Load configuration from a TOML file with environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading broker config: {:?}", path);
        let builder = Config::builder().add_source(File::from(path).required(true));
        Self::build(builder).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse configuration from TOML text with environment overrides
    pub fn from_toml(source: &str) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(source, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(
        builder: config_crate::ConfigBuilder<config_crate::builder::DefaultState>,
    ) -> Result<Self> {
        // Override with environment variables (BROKER__ prefix)
        let config = builder
            .add_source(
                Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator(defaults::ENV_SEPARATOR)
                    .separator(defaults::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut broker: BrokerConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        broker.expand_paths()?;
        broker.validate()?;
        Ok(broker)
    }

    /// Expand `~` and environment variables in schema paths
    pub fn expand_paths(&mut self) -> Result<()> {
        for file in self.schema.files.iter_mut().chain(self.schema.include_dirs.iter_mut()) {
            let expanded = shellexpand::full(file.as_str())
                .with_context(|| format!("Failed to expand schema path {file}"))?;
            if expanded != file.as_str() {
                debug!(from = %file, to = %expanded, "Expanded schema path");
            }
            *file = expanded.into_owned();
        }
        Ok(())
    }

    /// Reject configurations that cannot open a session
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            bail!("gateway.host must not be empty");
        }
        if self.gateway.port == 0 {
            bail!("gateway.port must be non-zero");
        }
        if self.schema.files.is_empty() {
            bail!("schema.files must list at least one schema file");
        }
        if self.session.heartbeat_message.trim().is_empty() {
            bail!("session.heartbeat_message must not be empty");
        }
        if self.session.max_frame_size == 0 {
            bail!("session.max_frame_size must be non-zero");
        }
        Ok(())
    }
}
