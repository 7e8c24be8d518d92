//! # Broker Configuration
//!
//! Loads the settings of one broker session: gateway endpoint, message
//! catalog, session timing and logging.
//!
//! ## Usage
//!
//! ```no_run
//! use broker_config::BrokerConfig;
//! use std::path::Path;
//!
//! let config = BrokerConfig::load(Path::new("config/broker.toml"))?;
//! println!("connecting to {}", config.gateway.endpoint());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Any key can be overridden from the environment with the `BROKER__`
//! prefix and `__` between sections, e.g. `BROKER__GATEWAY__PORT=5036`.

pub mod broker_config;
pub mod defaults;

// Re-export commonly used types
pub use broker_config::{
    BrokerConfig, GatewayConfig, LoggingConfig, MonitorConfig, SchemaConfig, SessionConfig,
};
