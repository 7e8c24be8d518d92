//! Message shapes shared by the codec and the connection layer

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Decoded message fields, keyed by field name
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Payload type reported for frames that could not be resolved
pub const UNKNOWN_PAYLOAD_TYPE: u32 = 0;

/// Name reported for payload types that are not in the catalog
pub const UNKNOWN_PAYLOAD_NAME: &str = "unknown";

/// Field on a reply that marks it as an application-level failure
pub const ERROR_CODE_FIELD: &str = "errorCode";

/// Role of a message type, decided once from its name when the catalog loads
///
/// Names ending in `Req`, `Res` or `Event` (any case) are requests,
/// responses and server pushes respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Request,
    Response,
    Event,
    /// Name follows none of the suffix conventions
    Other,
}

impl MessageCategory {
    pub const REQUEST_SUFFIX: &'static str = "req";
    pub const RESPONSE_SUFFIX: &'static str = "res";
    pub const EVENT_SUFFIX: &'static str = "event";

    /// Classify a message type by its name suffix, ignoring case
    pub fn from_type_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(Self::EVENT_SUFFIX) {
            MessageCategory::Event
        } else if lower.ends_with(Self::RESPONSE_SUFFIX) {
            MessageCategory::Response
        } else if lower.ends_with(Self::REQUEST_SUFFIX) {
            MessageCategory::Request
        } else {
            MessageCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Request => "request",
            MessageCategory::Response => "response",
            MessageCategory::Event => "event",
            MessageCategory::Other => "other",
        }
    }
}

/// Outer wire wrapper around every payload
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload_type: u32,
    pub payload: Bytes,
    pub client_msg_id: Option<String>,
}

/// Result of one decode pass over a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Numeric payload type, [`UNKNOWN_PAYLOAD_TYPE`] when unresolved
    pub payload_type: u32,
    /// Catalog name, empty when unresolved
    pub payload_name: String,
    pub category: Option<MessageCategory>,
    pub fields: Fields,
    pub client_msg_id: Option<String>,
}

impl DecodedMessage {
    /// Placeholder for a frame whose type could not be resolved
    ///
    /// The correlation id is kept when it was readable so a waiting
    /// command can still be matched by id.
    pub fn unresolved(client_msg_id: Option<String>) -> Self {
        Self {
            payload_type: UNKNOWN_PAYLOAD_TYPE,
            payload_name: String::new(),
            category: None,
            fields: Fields::new(),
            client_msg_id,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.payload_type == UNKNOWN_PAYLOAD_TYPE
    }

    /// The application error code, when the fields carry a non-null one
    pub fn error_code(&self) -> Option<&serde_json::Value> {
        error_code(&self.fields)
    }
}

/// Look up a non-null [`ERROR_CODE_FIELD`] in a field map
pub fn error_code(fields: &Fields) -> Option<&serde_json::Value> {
    fields.get(ERROR_CODE_FIELD).filter(|v| !v.is_null())
}

/// Normalize a correlation id read off the wire: empty means absent
pub(crate) fn non_empty(id: Option<&str>) -> Option<String> {
    id.filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_from_suffix() {
        assert_eq!(MessageCategory::from_type_name("PingREQ"), MessageCategory::Request);
        assert_eq!(MessageCategory::from_type_name("ProtoOAVersionReq"), MessageCategory::Request);
        assert_eq!(MessageCategory::from_type_name("PingRES"), MessageCategory::Response);
        assert_eq!(MessageCategory::from_type_name("ProtoErrorRes"), MessageCategory::Response);
        assert_eq!(MessageCategory::from_type_name("ProtoOASpotEvent"), MessageCategory::Event);
        assert_eq!(MessageCategory::from_type_name("SpotEVENT"), MessageCategory::Event);
        assert_eq!(MessageCategory::from_type_name("StatusNotice"), MessageCategory::Other);
    }

    #[test]
    fn test_error_code_ignores_null() {
        let mut fields = Fields::new();
        assert!(error_code(&fields).is_none());

        fields.insert(ERROR_CODE_FIELD.to_string(), json!(null));
        assert!(error_code(&fields).is_none());

        fields.insert(ERROR_CODE_FIELD.to_string(), json!("INSUFFICIENT_MARGIN"));
        assert_eq!(error_code(&fields), Some(&json!("INSUFFICIENT_MARGIN")));
    }

    #[test]
    fn test_unresolved_placeholder_keeps_id() {
        let msg = DecodedMessage::unresolved(Some("id-9".into()));
        assert!(msg.is_unresolved());
        assert!(msg.payload_name.is_empty());
        assert!(msg.fields.is_empty());
        assert_eq!(msg.client_msg_id.as_deref(), Some("id-9"));
    }
}
