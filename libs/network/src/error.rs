//! Connection Error Types
//!
//! Two layers:
//! - [`TransportError`]: socket, TLS and timeout faults of the byte pipe.
//! - [`BrokerError`]: what callers of the connection facade observe,
//!   including application-level rejections carried in reply fields.

use codec::{Fields, SchemaError};
use thiserror::Error;

/// Transport-level error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (endpoint: {endpoint:?})")]
    Connection {
        message: String,
        endpoint: Option<String>,
    },

    /// TLS handshake or certificate errors
    #[error("TLS error: {message}")]
    Tls {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, endpoint: Option<&str>) -> Self {
        Self::Connection {
            message: message.into(),
            endpoint: endpoint.map(|s| s.to_string()),
        }
    }

    /// Create a TLS error with source
    pub fn tls_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tls {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network { .. } => true,
            TransportError::Connection { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::Tls { .. } => false,
            TransportError::Configuration { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Connection { .. } => "connection",
            TransportError::Tls { .. } => "tls",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Timeout { .. } => "timeout",
            TransportError::Io { .. } => "io",
        }
    }
}

// Boxed sources are not Clone; clones keep the message only
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::Network { message, .. } => TransportError::Network {
                message: message.clone(),
                source: None,
            },
            TransportError::Connection { message, endpoint } => TransportError::Connection {
                message: message.clone(),
                endpoint: endpoint.clone(),
            },
            TransportError::Tls { message, .. } => TransportError::Tls {
                message: message.clone(),
                source: None,
            },
            TransportError::Configuration { message, field } => TransportError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            TransportError::Timeout {
                operation,
                timeout_ms,
            } => TransportError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            TransportError::Io { message, source } => TransportError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Errors surfaced by the broker connection facade
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Catalog load failure or an unencodable command
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The byte pipe failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The gateway answered with a populated error code
    #[error("Command rejected: {error_code} {}", .description.as_deref().unwrap_or_default())]
    Rejected {
        error_code: serde_json::Value,
        description: Option<String>,
        /// Full reply fields, including `errorCode`
        fields: Fields,
    },

    /// No reply arrived before the command deadline
    #[error("Command {correlation_id} timed out after {timeout_ms}ms")]
    Timeout {
        correlation_id: String,
        timeout_ms: u64,
    },

    /// The session ended while the command was pending
    #[error("Connection closed before a reply to {correlation_id} arrived")]
    ConnectionClosed { correlation_id: String },

    /// Another command with this id is still pending
    #[error("Correlation id {correlation_id} is already pending")]
    DuplicateCorrelationId { correlation_id: String },

    /// The session is not open
    #[error("Not connected to the gateway")]
    NotConnected,
}

impl BrokerError {
    /// Build a rejection from reply fields carrying an error code
    pub fn rejected(fields: Fields) -> Self {
        let error_code = fields
            .get(codec::ERROR_CODE_FIELD)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let description = fields
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string);

        Self::Rejected {
            error_code,
            description,
            fields,
        }
    }

    pub fn connection_closed(correlation_id: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            correlation_id: correlation_id.into(),
        }
    }

    /// The error code when the gateway rejected the command
    pub fn error_code(&self) -> Option<&serde_json::Value> {
        match self {
            BrokerError::Rejected { error_code, .. } => Some(error_code),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            BrokerError::Schema(_) => "schema",
            BrokerError::Transport(e) => e.category(),
            BrokerError::Rejected { .. } => "rejected",
            BrokerError::Timeout { .. } => "timeout",
            BrokerError::ConnectionClosed { .. } => "connection_closed",
            BrokerError::DuplicateCorrelationId { .. } => "duplicate_correlation_id",
            BrokerError::NotConnected => "not_connected",
        }
    }
}

/// Result type alias for facade operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
