//! Default configuration values
//!
//! Used by serde defaults in [`crate::BrokerConfig`] and by library
//! callers that build options without a config file.

/// Gateway endpoint defaults
pub mod gateway {
    /// TLS is on unless a local plaintext gateway is configured
    pub const TLS: bool = true;

    /// TCP connect plus TLS handshake budget (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Socket read buffer size
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;
}

/// Session behavior defaults
pub mod session {
    /// Heartbeat period (seconds), 0 disables
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

    /// Message type sent as heartbeat
    pub const HEARTBEAT_MESSAGE: &str = "ProtoHeartbeatEvent";

    /// Reply deadline for awaited commands (milliseconds), 0 disables
    pub const COMMAND_TIMEOUT_MS: u64 = 30_000;

    /// Largest accepted inbound frame; a larger one ends the session
    ///
    /// Sized for full symbol and history replies, well above a normal frame.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}

/// Environment variable prefix for overrides, e.g. `BROKER__GATEWAY__PORT`
pub const ENV_PREFIX: &str = "BROKER";

/// Separator between prefix and nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";
