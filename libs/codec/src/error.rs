//! Protocol-level errors for framing and schema-driven message processing
//!
//! Two families live here:
//! - [`ProtocolError`]: faults in a single frame on the wire. These are
//!   recoverable per frame; the connection layer logs them and moves on.
//! - [`SchemaError`]: faults while loading the message catalog (fatal at
//!   startup) or while encoding a caller-supplied message.

use thiserror::Error;

/// Wire-level errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Declared frame length exceeds the configured limit
    #[error("Frame too large: declared {declared} bytes exceeds maximum {max} (indicates: {diagnosis})")]
    FrameTooLarge {
        declared: usize,
        max: usize,
        diagnosis: String,
    },

    /// The outer envelope could not be deserialized
    #[error("Malformed envelope: {reason} (frame: {frame_size} bytes)")]
    MalformedEnvelope { reason: String, frame_size: usize },

    /// The inner payload could not be deserialized as its declared type
    #[error("Undecodable payload for type {payload_type} ({payload_name}): {reason}")]
    UndecodablePayload {
        payload_type: u32,
        payload_name: String,
        reason: String,
    },
}

impl ProtocolError {
    /// Create a FrameTooLarge error with a guess at the cause
    pub fn frame_too_large(declared: usize, max: usize) -> Self {
        let diagnosis = if declared > max.saturating_mul(16) {
            "stream desynchronized or not speaking this protocol"
        } else {
            "peer sent a frame above the configured limit"
        };

        Self::FrameTooLarge {
            declared,
            max,
            diagnosis: diagnosis.to_string(),
        }
    }

    /// Create a MalformedEnvelope error
    pub fn malformed_envelope(reason: impl Into<String>, frame_size: usize) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
            frame_size,
        }
    }

    /// Create an UndecodablePayload error
    pub fn undecodable_payload(
        payload_type: u32,
        payload_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UndecodablePayload {
            payload_type,
            payload_name: payload_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the stream can still be trusted after this error
    ///
    /// An oversized length header means the framing position is lost.
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLarge { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProtocolError::FrameTooLarge { .. } => "frame_too_large",
            ProtocolError::MalformedEnvelope { .. } => "malformed_envelope",
            ProtocolError::UndecodablePayload { .. } => "undecodable_payload",
        }
    }
}

/// Message catalog errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    /// No schema definition files were given
    #[error("No schema files provided: at least one .proto file is required")]
    NoSchemaFiles,

    /// A schema file does not exist on disk
    #[error("Schema file not found: {path}")]
    FileNotFound { path: String },

    /// The IDL compiler rejected the catalog
    #[error("Schema compilation failed: {message}")]
    Compile { message: String },

    /// The compiled descriptors could not be assembled into a pool
    #[error("Invalid descriptor set: {message}")]
    Descriptor { message: String },

    /// No message has the reserved type-code field without a default
    #[error("No envelope type found: exactly one message must declare '{field}' without a default")]
    MissingEnvelope { field: String },

    /// More than one message looks like the envelope
    #[error("Ambiguous envelope: {candidates:?} all declare '{field}' without a default")]
    AmbiguousEnvelope {
        field: String,
        candidates: Vec<String>,
    },

    /// The envelope does not have the fields every frame needs
    #[error("Envelope '{type_name}' is missing field '{field}'")]
    InvalidEnvelope { type_name: String, field: String },

    /// Two messages claim the same numeric code
    #[error("Duplicate payload type {code}: claimed by both '{first}' and '{second}'")]
    DuplicatePayloadType {
        code: u32,
        first: String,
        second: String,
    },

    /// Two messages in different packages share a short name
    #[error("Duplicate message name '{name}' across packages")]
    DuplicateTypeName { name: String },

    /// A payloadType default could not be turned into a number
    #[error("Invalid payload type default '{default}' on '{type_name}'")]
    InvalidTypeCode { type_name: String, default: String },

    /// Lookup of a message name that is not in the catalog
    #[error("Unknown message type '{type_name}'")]
    UnknownMessageType { type_name: String },

    /// Caller-provided fields do not fit the message definition
    #[error("Invalid fields for '{type_name}': {message}")]
    InvalidFields { type_name: String, message: String },
}

impl SchemaError {
    /// Create an UnknownMessageType error
    pub fn unknown_message_type(type_name: impl Into<String>) -> Self {
        Self::UnknownMessageType {
            type_name: type_name.into(),
        }
    }

    /// Create an InvalidFields error
    pub fn invalid_fields(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFields {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error happened while loading the catalog
    pub fn is_load_error(&self) -> bool {
        !matches!(
            self,
            SchemaError::UnknownMessageType { .. } | SchemaError::InvalidFields { .. }
        )
    }
}

/// Result type for wire operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type for catalog operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
