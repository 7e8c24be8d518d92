//! # Schema Registry - Runtime Message Catalog
//!
//! ## Purpose
//!
//! Loads `.proto` definitions at startup and resolves every message type
//! dynamically: no generated structs, one [`SchemaEntry`] per payload type
//! holding its descriptor, numeric code and [`MessageCategory`].
//!
//! ## Catalog Conventions
//!
//! - A message with a `payloadType` field whose declared default names its
//!   numeric code is a payload type (`[default = PING_REQ]` or
//!   `[default = 40]`).
//! - Exactly one message declares `payloadType` with no default: the
//!   envelope. It must also carry `payload` (bytes) and `clientMsgId`
//!   (string).
//! - Messages without a `payloadType` field are model types, usable only
//!   nested inside payloads.
//!
//! ## Wire Shape
//!
//! ```text
//! Envelope { payloadType: u32, payload: bytes, clientMsgId: string }
//!                              └── PayloadEntry(payloadType).decode(payload)
//! ```
//!
//! Fields cross the API as JSON-style maps ([`Fields`]) using the
//! protobuf JSON mapping, with 64-bit integers kept numeric.
//!
//! ## Failure Policy
//!
//! Loading is all-or-nothing. Decoding never fails outright: a frame whose
//! envelope is malformed, whose type code is unknown, or whose payload does
//! not parse comes back as [`DecodedMessage::unresolved`], keeping the
//! correlation id whenever the envelope was readable.

use crate::error::{ProtocolError, ProtocolResult, SchemaError, SchemaResult};
use crate::message::{non_empty, DecodedMessage, Envelope, Fields, MessageCategory};
use bytes::Bytes;
use prost::Message as _;
use prost_reflect::{
    DescriptorPool, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, SerializeOptions,
    Value,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Field whose default value is a message type's numeric code
pub const PAYLOAD_TYPE_FIELD: &str = "payloadType";

/// Envelope field holding the serialized inner message
pub const PAYLOAD_FIELD: &str = "payload";

/// Envelope field holding the correlation id
pub const CLIENT_MSG_ID_FIELD: &str = "clientMsgId";

/// One payload type of the catalog
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    type_name: String,
    full_name: String,
    payload_type: u32,
    category: MessageCategory,
    descriptor: MessageDescriptor,
}

impl SchemaEntry {
    /// Short message name, e.g. `ProtoOASpotEvent`
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Package-qualified name, e.g. `gateway.ProtoOASpotEvent`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn payload_type(&self) -> u32 {
        self.payload_type
    }

    pub fn category(&self) -> MessageCategory {
        self.category
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Serialize caller fields as this message type
    ///
    /// `null` encodes an empty message. Unknown field names and values of
    /// the wrong shape are rejected.
    pub fn encode(&self, fields: &serde_json::Value) -> SchemaResult<Vec<u8>> {
        let message = if fields.is_null() {
            DynamicMessage::new(self.descriptor.clone())
        } else {
            DynamicMessage::deserialize(self.descriptor.clone(), fields)
                .map_err(|e| SchemaError::invalid_fields(&self.type_name, e.to_string()))?
        };
        Ok(message.encode_to_vec())
    }

    /// Parse payload bytes of this message type into fields
    pub fn decode(&self, payload: &[u8]) -> ProtocolResult<Fields> {
        let message = DynamicMessage::decode(self.descriptor.clone(), payload).map_err(|e| {
            ProtocolError::undecodable_payload(self.payload_type, &self.type_name, e.to_string())
        })?;
        message_to_fields(&message).map_err(|e| {
            ProtocolError::undecodable_payload(self.payload_type, &self.type_name, e.to_string())
        })
    }
}

/// Resolved envelope layout
#[derive(Debug, Clone)]
struct EnvelopeLayout {
    descriptor: MessageDescriptor,
    payload_type: FieldDescriptor,
    payload: FieldDescriptor,
    client_msg_id: FieldDescriptor,
}

/// Name ↔ code catalog built once at startup; read-only afterwards
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pool: DescriptorPool,
    envelope: EnvelopeLayout,
    entries: Vec<SchemaEntry>,
    by_name: HashMap<String, usize>,
    by_lower_name: HashMap<String, usize>,
    by_code: HashMap<u32, usize>,
}

impl SchemaRegistry {
    /// Compile and load the given schema files
    ///
    /// Each file's directory is added to the import path.
    pub fn load<P: AsRef<Path>>(files: &[P]) -> SchemaResult<Self> {
        Self::load_with_includes(files, &[] as &[PathBuf])
    }

    /// Compile and load schema files with extra import roots
    pub fn load_with_includes<P, Q>(files: &[P], include_dirs: &[Q]) -> SchemaResult<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        if files.is_empty() {
            return Err(SchemaError::NoSchemaFiles);
        }

        let mut resolved = Vec::with_capacity(files.len());
        let mut includes: Vec<PathBuf> = Vec::new();

        for dir in include_dirs {
            let dir = canonical(dir.as_ref())?;
            if !includes.contains(&dir) {
                includes.push(dir);
            }
        }

        for file in files {
            let path = canonical(file.as_ref())?;
            if let Some(parent) = path.parent() {
                if !includes.iter().any(|dir| dir == parent) {
                    includes.push(parent.to_path_buf());
                }
            }
            resolved.push(path);
        }

        debug!(files = ?resolved, includes = ?includes, "Compiling schema catalog");

        let descriptor_set = protox::compile(&resolved, &includes).map_err(|e| {
            SchemaError::Compile {
                message: e.to_string(),
            }
        })?;
        let pool = DescriptorPool::from_file_descriptor_set(descriptor_set).map_err(|e| {
            SchemaError::Descriptor {
                message: e.to_string(),
            }
        })?;

        Self::from_pool(pool)
    }

    /// Build the catalog from an already-assembled descriptor pool
    pub fn from_pool(pool: DescriptorPool) -> SchemaResult<Self> {
        let mut envelope_candidates = Vec::new();
        let mut entries: Vec<SchemaEntry> = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_lower_name = HashMap::new();
        let mut by_code: HashMap<u32, usize> = HashMap::new();

        for message in pool.all_messages() {
            let Some(field) = message.get_field_by_name(PAYLOAD_TYPE_FIELD) else {
                continue;
            };

            let Some(code) = declared_type_code(&message, &field)? else {
                envelope_candidates.push(message);
                continue;
            };

            if let Some(&existing) = by_code.get(&code) {
                let first: &SchemaEntry = &entries[existing];
                return Err(SchemaError::DuplicatePayloadType {
                    code,
                    first: first.full_name.clone(),
                    second: message.full_name().to_string(),
                });
            }
            if by_name.contains_key(message.name()) {
                return Err(SchemaError::DuplicateTypeName {
                    name: message.name().to_string(),
                });
            }

            let index = entries.len();
            let entry = SchemaEntry {
                type_name: message.name().to_string(),
                full_name: message.full_name().to_string(),
                payload_type: code,
                category: MessageCategory::from_type_name(message.name()),
                descriptor: message.clone(),
            };

            by_code.insert(code, index);
            by_name.insert(entry.type_name.clone(), index);
            by_name.insert(entry.full_name.clone(), index);
            let lower = entry.type_name.to_ascii_lowercase();
            if by_lower_name.contains_key(&lower) {
                debug!(name = %entry.type_name, "Case-insensitive name collision, keeping first");
            } else {
                by_lower_name.insert(lower, index);
            }
            entries.push(entry);
        }

        let envelope = match envelope_candidates.len() {
            0 => {
                return Err(SchemaError::MissingEnvelope {
                    field: PAYLOAD_TYPE_FIELD.to_string(),
                })
            }
            1 => envelope_layout(envelope_candidates.remove(0))?,
            _ => {
                return Err(SchemaError::AmbiguousEnvelope {
                    field: PAYLOAD_TYPE_FIELD.to_string(),
                    candidates: envelope_candidates
                        .iter()
                        .map(|m| m.full_name().to_string())
                        .collect(),
                })
            }
        };

        info!(
            payload_types = entries.len(),
            envelope = %envelope.descriptor.full_name(),
            "Loaded schema catalog"
        );

        Ok(Self {
            pool,
            envelope,
            entries,
            by_name,
            by_lower_name,
            by_code,
        })
    }

    /// Encode `fields` as `type_name` and wrap it in the envelope
    ///
    /// The result is an unframed envelope ready for the length prefix.
    pub fn encode(
        &self,
        type_name: &str,
        fields: &serde_json::Value,
        client_msg_id: Option<&str>,
    ) -> SchemaResult<Bytes> {
        let entry = self
            .entry(type_name)
            .ok_or_else(|| SchemaError::unknown_message_type(type_name))?;
        let payload = entry.encode(fields)?;

        Ok(self.encode_envelope(&Envelope {
            payload_type: entry.payload_type,
            payload: Bytes::from(payload),
            client_msg_id: client_msg_id.map(str::to_string),
        }))
    }

    /// Serialize an envelope as-is
    ///
    /// No catalog check is made on `payload_type`, which makes this usable
    /// for raw or foreign payloads.
    pub fn encode_envelope(&self, envelope: &Envelope) -> Bytes {
        let layout = &self.envelope;
        let mut message = DynamicMessage::new(layout.descriptor.clone());
        message.set_field(
            &layout.payload_type,
            code_to_value(&layout.payload_type.kind(), envelope.payload_type),
        );
        message.set_field(&layout.payload, Value::Bytes(envelope.payload.clone()));
        if let Some(id) = envelope.client_msg_id.as_deref().filter(|id| !id.is_empty()) {
            message.set_field(&layout.client_msg_id, Value::String(id.to_string()));
        }
        Bytes::from(message.encode_to_vec())
    }

    /// Deserialize just the outer envelope of a frame
    pub fn decode_envelope(&self, frame: &[u8]) -> ProtocolResult<Envelope> {
        let layout = &self.envelope;
        let message = DynamicMessage::decode(layout.descriptor.clone(), frame)
            .map_err(|e| ProtocolError::malformed_envelope(e.to_string(), frame.len()))?;

        let payload_type = code_from_value(&message.get_field(&layout.payload_type))
            .ok_or_else(|| ProtocolError::malformed_envelope("payload type out of range", frame.len()))?;
        let payload = message
            .get_field(&layout.payload)
            .as_bytes()
            .cloned()
            .unwrap_or_default();
        let client_msg_id = non_empty(message.get_field(&layout.client_msg_id).as_str());

        Ok(Envelope {
            payload_type,
            payload,
            client_msg_id,
        })
    }

    /// Decode one complete frame, never failing
    ///
    /// Problems are logged and reported through an unresolved placeholder.
    pub fn decode(&self, frame: &[u8]) -> DecodedMessage {
        let envelope = match self.decode_envelope(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Dropping frame with malformed envelope");
                return DecodedMessage::unresolved(None);
            }
        };

        let Some(entry) = self.entry_by_code(envelope.payload_type) else {
            warn!(
                payload_type = envelope.payload_type,
                client_msg_id = ?envelope.client_msg_id,
                "Unknown payload type"
            );
            return DecodedMessage::unresolved(envelope.client_msg_id);
        };

        match entry.decode(&envelope.payload) {
            Ok(fields) => DecodedMessage {
                payload_type: entry.payload_type,
                payload_name: entry.type_name.clone(),
                category: Some(entry.category),
                fields,
                client_msg_id: envelope.client_msg_id,
            },
            Err(err) => {
                warn!(
                    error = %err,
                    client_msg_id = ?envelope.client_msg_id,
                    "Failed to decode payload"
                );
                DecodedMessage::unresolved(envelope.client_msg_id)
            }
        }
    }

    /// Look up by short or package-qualified name
    pub fn entry(&self, name: &str) -> Option<&SchemaEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Look up by short name ignoring ASCII case
    pub fn entry_ignore_case(&self, name: &str) -> Option<&SchemaEntry> {
        self.entry(name).or_else(|| {
            self.by_lower_name
                .get(&name.to_ascii_lowercase())
                .map(|&i| &self.entries[i])
        })
    }

    pub fn entry_by_code(&self, code: u32) -> Option<&SchemaEntry> {
        self.by_code.get(&code).map(|&i| &self.entries[i])
    }

    pub fn payload_type(&self, name: &str) -> Option<u32> {
        self.entry(name).map(SchemaEntry::payload_type)
    }

    pub fn payload_name(&self, code: u32) -> Option<&str> {
        self.entry_by_code(code).map(SchemaEntry::type_name)
    }

    /// The reply type paired with a request name, if the catalog has one
    ///
    /// `FooReq` pairs with `FooRes`, matched without regard to case.
    pub fn response_for(&self, request_name: &str) -> Option<&SchemaEntry> {
        let suffix_len = MessageCategory::REQUEST_SUFFIX.len();
        if MessageCategory::from_type_name(request_name) != MessageCategory::Request
            || request_name.len() < suffix_len
        {
            return None;
        }
        let stem = &request_name[..request_name.len() - suffix_len];
        let candidate = format!("{}{}", stem, MessageCategory::RESPONSE_SUFFIX);
        self.entry_ignore_case(&candidate)
            .filter(|entry| entry.category == MessageCategory::Response)
    }

    /// Package-qualified name of the envelope type
    pub fn envelope_name(&self) -> &str {
        self.envelope.descriptor.full_name()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

fn canonical(path: &Path) -> SchemaResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|_| SchemaError::FileNotFound {
        path: path.display().to_string(),
    })
}

/// Read the numeric code from the `payloadType` field default, if declared
fn declared_type_code(
    message: &MessageDescriptor,
    field: &FieldDescriptor,
) -> SchemaResult<Option<u32>> {
    let default = match field.field_descriptor_proto().default_value.as_deref() {
        Some(default) if !default.is_empty() => default,
        _ => return Ok(None),
    };

    let code = match field.kind() {
        Kind::Enum(enum_desc) => enum_desc
            .get_value_by_name(default)
            .and_then(|value| u32::try_from(value.number()).ok()),
        _ => default.parse::<u32>().ok(),
    };

    match code {
        Some(code) if code != crate::message::UNKNOWN_PAYLOAD_TYPE => Ok(Some(code)),
        _ => Err(SchemaError::InvalidTypeCode {
            type_name: message.full_name().to_string(),
            default: default.to_string(),
        }),
    }
}

fn envelope_layout(descriptor: MessageDescriptor) -> SchemaResult<EnvelopeLayout> {
    let field = |name: &str, accepts: fn(&Kind) -> bool| {
        descriptor
            .get_field_by_name(name)
            .filter(|f| !f.is_list() && accepts(&f.kind()))
            .ok_or_else(|| SchemaError::InvalidEnvelope {
                type_name: descriptor.full_name().to_string(),
                field: name.to_string(),
            })
    };

    let payload_type = field(PAYLOAD_TYPE_FIELD, |k| {
        matches!(k, Kind::Uint32 | Kind::Int32 | Kind::Uint64 | Kind::Int64)
    })?;
    let payload = field(PAYLOAD_FIELD, |k| matches!(k, Kind::Bytes))?;
    let client_msg_id = field(CLIENT_MSG_ID_FIELD, |k| matches!(k, Kind::String))?;

    Ok(EnvelopeLayout {
        descriptor: descriptor.clone(),
        payload_type,
        payload,
        client_msg_id,
    })
}

fn code_to_value(kind: &Kind, code: u32) -> Value {
    match kind {
        Kind::Int32 => Value::I32(code as i32),
        Kind::Uint64 => Value::U64(u64::from(code)),
        Kind::Int64 => Value::I64(i64::from(code)),
        _ => Value::U32(code),
    }
}

fn code_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::U32(v) => Some(*v),
        Value::I32(v) => u32::try_from(*v).ok(),
        Value::U64(v) => u32::try_from(*v).ok(),
        Value::I64(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

fn message_to_fields(message: &DynamicMessage) -> Result<Fields, serde_json::Error> {
    let options = SerializeOptions::new().stringify_64_bit_integers(false);
    match message.serialize_with_options(serde_json::value::Serializer, &options)? {
        serde_json::Value::Object(fields) => Ok(fields),
        _ => Ok(Fields::new()),
    }
}
