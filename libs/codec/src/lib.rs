//! # Broker Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the broker connection: how bytes on the socket
//! become typed messages and back, with no knowledge of sockets or
//! sessions.
//!
//! - Length-prefixed framing with stateful reassembly across reads
//! - A runtime schema catalog loaded from `.proto` files
//! - Envelope wrapping and unwrapping with correlation ids
//! - Message categories (request, response, event) fixed at load time
//!
//! ## Architecture Role
//!
//! ```text
//! schemas/*.proto → [codec] → network/
//!                     ↓          ↓
//!              SchemaRegistry  Transport
//!              FrameDecoder    Correlator
//!              DecodedMessage  EventBus
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket or TLS handling (belongs in network/)
//! - Request/response correlation or subscriptions

pub mod error;
pub mod frame;
pub mod message;
pub mod schema;

pub use error::{ProtocolError, ProtocolResult, SchemaError, SchemaResult};
pub use frame::{
    encode_frame, encode_frame_into, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
pub use message::{
    error_code, DecodedMessage, Envelope, Fields, MessageCategory, ERROR_CODE_FIELD,
    UNKNOWN_PAYLOAD_NAME, UNKNOWN_PAYLOAD_TYPE,
};
pub use schema::{
    SchemaEntry, SchemaRegistry, CLIENT_MSG_ID_FIELD, PAYLOAD_FIELD, PAYLOAD_TYPE_FIELD,
};
