//! Integration tests for loading schema catalogs and encoding through them
//!
//! Uses the test fixture, the shipped gateway catalog, and throwaway
//! catalogs written to temp directories for the failure cases.

use codec::{
    encode_frame, FrameDecoder, MessageCategory, SchemaError, SchemaRegistry, PAYLOAD_TYPE_FIELD,
};
use prost_reflect::{Kind, MessageDescriptor};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/test_gateway.proto")
}

fn shipped_catalog() -> Vec<PathBuf> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schemas/gateway");
    [
        "common_model.proto",
        "common_messages.proto",
        "trading_model.proto",
        "trading_messages.proto",
    ]
    .iter()
    .map(|f| dir.join(f))
    .collect()
}

fn write_catalog(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("catalog.proto");
    fs::write(&path, format!("syntax = \"proto2\";\npackage scratch;\n{body}"))
        .expect("Failed to write temp catalog");
    path
}

#[test]
fn test_shipped_catalog_loads() {
    let registry = SchemaRegistry::load(&shipped_catalog()).expect("Failed to load gateway catalog");

    assert_eq!(registry.envelope_name(), "gateway.ProtoMessage");
    assert_eq!(registry.payload_type("ProtoHeartbeatEvent"), Some(51));
    assert_eq!(registry.payload_type("ProtoOASpotEvent"), Some(2131));
    assert_eq!(registry.payload_name(2142), Some("ProtoOAErrorRes"));
    assert!(registry.entry("ProtoOAPosition").is_none(), "model types are not payloads");

    assert_eq!(
        registry.response_for("ProtoOAVersionReq").map(|e| e.type_name()),
        Some("ProtoOAVersionRes")
    );
    // Order placement reports through execution events, never a Res.
    assert!(registry.response_for("ProtoOANewOrderReq").is_none());
}

#[test]
fn test_name_code_mapping_is_bijective() {
    for files in [vec![fixture()], shipped_catalog()] {
        let registry = SchemaRegistry::load(&files).unwrap();
        let mut codes = HashSet::new();

        for entry in registry.entries() {
            assert!(codes.insert(entry.payload_type()), "code {} reused", entry.payload_type());
            assert_eq!(registry.payload_type(entry.type_name()), Some(entry.payload_type()));
            assert_eq!(registry.payload_name(entry.payload_type()), Some(entry.type_name()));
        }
        assert_eq!(codes.len(), registry.len());
    }
}

#[test]
fn test_encode_decode_preserves_fields() {
    let registry = SchemaRegistry::load(&[fixture()]).unwrap();
    let fields = json!({
        "symbol": "EURUSD",
        "volume": 1_500_000_000_000i64,
        "price": 1.0825,
        "side": "SELL",
        "tags": ["hedge", "night"],
    });

    let envelope = registry.encode("OrderREQ", &fields, Some("order-1")).unwrap();
    let decoded = registry.decode(&envelope);

    assert_eq!(decoded.payload_name, "OrderREQ");
    assert_eq!(decoded.category, Some(MessageCategory::Request));
    assert_eq!(decoded.client_msg_id.as_deref(), Some("order-1"));
    assert_eq!(serde_json::Value::Object(decoded.fields), fields);
}

/// Deepest nesting filled in by `sample_message`
const SAMPLE_DEPTH: usize = 3;

/// A value for every field of `descriptor`, lists with one element
fn sample_message(descriptor: &MessageDescriptor, depth: usize) -> Value {
    let mut fields = serde_json::Map::new();
    for field in descriptor.fields() {
        if field.name() == PAYLOAD_TYPE_FIELD || field.is_map() {
            continue;
        }
        let Some(value) = sample_value(&field.kind(), depth) else {
            continue;
        };
        let value = if field.is_list() { json!([value]) } else { value };
        fields.insert(field.json_name().to_string(), value);
    }
    Value::Object(fields)
}

fn sample_value(kind: &Kind, depth: usize) -> Option<Value> {
    match kind {
        Kind::Double | Kind::Float => Some(json!(1.5)),
        Kind::Int32
        | Kind::Sint32
        | Kind::Sfixed32
        | Kind::Uint32
        | Kind::Fixed32
        | Kind::Int64
        | Kind::Sint64
        | Kind::Sfixed64
        | Kind::Uint64
        | Kind::Fixed64 => Some(json!(7)),
        Kind::Bool => Some(json!(true)),
        Kind::String => Some(json!("sample")),
        Kind::Bytes => Some(json!("AQID")),
        Kind::Enum(values) => values.values().next().map(|v| json!(v.name())),
        Kind::Message(nested) if depth < SAMPLE_DEPTH => Some(sample_message(nested, depth + 1)),
        Kind::Message(_) => None,
    }
}

#[test]
fn test_every_payload_type_survives_encode_decode() {
    for files in [vec![fixture()], shipped_catalog()] {
        let registry = SchemaRegistry::load(&files).unwrap();
        assert!(!registry.is_empty());

        for entry in registry.entries() {
            let fields = sample_message(entry.descriptor(), 0);

            let payload = entry.encode(&fields).unwrap();
            let decoded = entry.decode(&payload).unwrap();
            assert_eq!(Value::Object(decoded), fields, "{} changed", entry.type_name());

            let envelope = registry.encode(entry.type_name(), &fields, Some("rt-1")).unwrap();
            let message = registry.decode(&envelope);
            assert_eq!(message.payload_type, entry.payload_type());
            assert_eq!(message.payload_name, entry.type_name());
            assert_eq!(message.category, Some(entry.category()));
            assert_eq!(message.client_msg_id.as_deref(), Some("rt-1"));
            assert_eq!(Value::Object(message.fields), fields);
        }
    }
}

#[test]
fn test_nested_model_types_round_through_events() {
    let registry = SchemaRegistry::load(&[fixture()]).unwrap();
    let fields = json!({"symbol": "BTCUSD", "quote": {"bid": 100.5, "ask": 101.0}});

    let decoded = registry.decode(&registry.encode("SpotEVENT", &fields, None).unwrap());

    assert_eq!(decoded.category, Some(MessageCategory::Event));
    assert_eq!(decoded.client_msg_id, None);
    assert_eq!(decoded.fields.get("quote"), fields.get("quote"));
}

#[test]
fn test_framed_stream_decodes_in_order() {
    let registry = SchemaRegistry::load(&[fixture()]).unwrap();
    let mut wire = Vec::new();
    for (name, id) in [("PingREQ", "a"), ("HeartbeatEvent", ""), ("PingRES", "a")] {
        let id = (!id.is_empty()).then_some(id);
        wire.extend_from_slice(&encode_frame(&registry.encode(name, &json!({}), id).unwrap()));
    }

    let mut decoder = FrameDecoder::default();
    let mut names = Vec::new();
    for piece in wire.chunks(5) {
        for frame in decoder.decode(piece).unwrap() {
            names.push(registry.decode(&frame).payload_name);
        }
    }
    assert_eq!(names, vec!["PingREQ", "HeartbeatEvent", "PingRES"]);
}

#[test]
fn test_null_fields_encode_empty_message() {
    let registry = SchemaRegistry::load(&[fixture()]).unwrap();
    let decoded = registry.decode(&registry.encode("HeartbeatEvent", &json!(null), None).unwrap());
    assert_eq!(decoded.payload_type, 7);
    assert!(decoded.fields.is_empty());
}

#[test]
fn test_catalog_without_envelope_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(
        &dir,
        "message PingReq { optional uint32 payloadType = 1 [default = 10]; }",
    );

    let err = SchemaRegistry::load(&[path]).unwrap_err();
    assert!(matches!(err, SchemaError::MissingEnvelope { .. }));
    assert!(err.is_load_error());
}

#[test]
fn test_catalog_with_two_envelopes_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(
        &dir,
        "message A { optional uint32 payloadType = 1; optional bytes payload = 2; optional string clientMsgId = 3; }\n\
         message B { optional uint32 payloadType = 1; optional bytes payload = 2; optional string clientMsgId = 3; }",
    );

    match SchemaRegistry::load(&[path]).unwrap_err() {
        SchemaError::AmbiguousEnvelope { candidates, .. } => {
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected ambiguous envelope, got {other:?}"),
    }
}

#[test]
fn test_envelope_missing_payload_field_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(
        &dir,
        "message Wrapper { optional uint32 payloadType = 1; optional string clientMsgId = 3; }",
    );

    let err = SchemaRegistry::load(&[path]).unwrap_err();
    assert!(matches!(err, SchemaError::InvalidEnvelope { ref field, .. } if field == "payload"));
}

#[test]
fn test_duplicate_codes_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(
        &dir,
        "message Wrapper { optional uint32 payloadType = 1; optional bytes payload = 2; optional string clientMsgId = 3; }\n\
         message FirstReq { optional uint32 payloadType = 1 [default = 9]; }\n\
         message SecondReq { optional uint32 payloadType = 1 [default = 9]; }",
    );

    let err = SchemaRegistry::load(&[path]).unwrap_err();
    assert!(matches!(err, SchemaError::DuplicatePayloadType { code: 9, .. }));
}

#[test]
fn test_syntax_errors_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(&dir, "message Broken { optional uint32 = 1; }");

    let err = SchemaRegistry::load(&[path]).unwrap_err();
    assert!(matches!(err, SchemaError::Compile { .. }));
}
