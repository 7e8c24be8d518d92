//! Inbound classification
//!
//! Every decoded frame becomes exactly one [`Inbound`] variant. The
//! category comes from the catalog entry, fixed when the schema loaded.

use codec::{DecodedMessage, MessageCategory};
use std::fmt;

/// Why a frame cannot be routed as an event or a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnroutableReason {
    /// Envelope unreadable, type code not in the catalog, or payload undecodable
    UnknownPayloadType,
    /// Known type whose category is neither event nor response
    UnexpectedCategory(MessageCategory),
}

impl fmt::Display for UnroutableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnroutableReason::UnknownPayloadType => f.write_str("unknown payload type"),
            UnroutableReason::UnexpectedCategory(category) => {
                write!(f, "unexpected {} message", category.as_str())
            }
        }
    }
}

/// Routing decision for one decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server push: published, never settles a command
    Event(DecodedMessage),
    /// Reply: settles the pending command with its correlation id
    Response(DecodedMessage),
    /// Neither; settled by correlation id only as a last resort
    Unroutable {
        message: DecodedMessage,
        reason: UnroutableReason,
    },
}

impl Inbound {
    pub fn classify(message: DecodedMessage) -> Self {
        match message.category {
            None => Inbound::Unroutable {
                message,
                reason: UnroutableReason::UnknownPayloadType,
            },
            Some(MessageCategory::Event) => Inbound::Event(message),
            Some(MessageCategory::Response) => Inbound::Response(message),
            Some(category) => Inbound::Unroutable {
                message,
                reason: UnroutableReason::UnexpectedCategory(category),
            },
        }
    }

    pub fn message(&self) -> &DecodedMessage {
        match self {
            Inbound::Event(message) | Inbound::Response(message) => message,
            Inbound::Unroutable { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::Fields;

    fn decoded(name: &str, category: Option<MessageCategory>) -> DecodedMessage {
        DecodedMessage {
            payload_type: if category.is_some() { 9 } else { 0 },
            payload_name: name.to_string(),
            category,
            fields: Fields::new(),
            client_msg_id: Some("id-1".into()),
        }
    }

    #[test]
    fn test_event_with_correlation_id_stays_event() {
        let inbound = Inbound::classify(decoded("SpotEVENT", Some(MessageCategory::Event)));
        assert!(matches!(inbound, Inbound::Event(_)));
    }

    #[test]
    fn test_response_classified() {
        let inbound = Inbound::classify(decoded("PingRES", Some(MessageCategory::Response)));
        assert!(matches!(inbound, Inbound::Response(_)));
        assert_eq!(inbound.message().client_msg_id.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_unroutable_reasons() {
        match Inbound::classify(DecodedMessage::unresolved(None)) {
            Inbound::Unroutable { reason, .. } => {
                assert_eq!(reason, UnroutableReason::UnknownPayloadType)
            }
            other => panic!("expected unroutable, got {other:?}"),
        }

        match Inbound::classify(decoded("StatusNotice", Some(MessageCategory::Other))) {
            Inbound::Unroutable { reason, .. } => {
                assert_eq!(reason.to_string(), "unexpected other message")
            }
            other => panic!("expected unroutable, got {other:?}"),
        }
    }
}
