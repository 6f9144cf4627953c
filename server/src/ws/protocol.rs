//! Envelope codec for chat frames.
//!
//! Inbound text frames are JSON objects `{"text": "...", "recipient_id": ...}`.
//! Outbound frames are whatever the configured renderer produces.

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::chat::render::DeliveryRenderer;
use crate::hub::{OutboundPayload, Recipient, RoutedMessage, UserId};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid chat envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// A parsed inbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub text: String,
    pub recipient: Recipient,
}

impl InboundEnvelope {
    pub fn into_routed(
        self,
        sender_id: UserId,
        sender_name: String,
        created_at: DateTime<Utc>,
    ) -> RoutedMessage {
        RoutedMessage {
            sender_id,
            sender_name,
            recipient: self.recipient,
            text: self.text,
            created_at,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    text: String,
    #[serde(default)]
    recipient_id: Option<RawRecipient>,
}

/// Shapes a client may send for `recipient_id`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecipient {
    Number(serde_json::Number),
    Text(String),
    Other(IgnoredAny),
}

impl RawRecipient {
    /// Numbers and numeric strings name a user; every other shape, and 0,
    /// means broadcast.
    fn resolve(self) -> Recipient {
        let id = match self {
            RawRecipient::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as u64)
            }),
            RawRecipient::Text(s) => s.parse::<u64>().ok(),
            RawRecipient::Other(_) => None,
        };
        id.map(Recipient::from_id).unwrap_or(Recipient::Broadcast)
    }
}

/// Parse one inbound text frame. `text` must be a string; unknown fields are
/// ignored.
pub fn parse_inbound(raw: &str) -> Result<InboundEnvelope, EnvelopeError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;
    Ok(InboundEnvelope {
        text: envelope.text,
        recipient: envelope
            .recipient_id
            .map(RawRecipient::resolve)
            .unwrap_or(Recipient::Broadcast),
    })
}

/// Render a message for delivery. Rendering problems are logged and produce
/// an empty payload instead of failing the route.
pub fn render_delivery(renderer: &dyn DeliveryRenderer, message: &RoutedMessage) -> OutboundPayload {
    match renderer.render(message) {
        Ok(body) => OutboundPayload::from(body),
        Err(e) => {
            tracing::error!(
                sender_id = message.sender_id,
                error = %e,
                "Failed to render message"
            );
            OutboundPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_recipient() {
        let env = parse_inbound(r#"{"text":"hi","recipient_id":2}"#).unwrap();
        assert_eq!(env.text, "hi");
        assert_eq!(env.recipient, Recipient::User(2));
    }

    #[test]
    fn string_recipient() {
        let env = parse_inbound(r#"{"text":"hi","recipient_id":"17"}"#).unwrap();
        assert_eq!(env.recipient, Recipient::User(17));
    }

    #[test]
    fn fractional_recipient_is_truncated() {
        let env = parse_inbound(r#"{"text":"hi","recipient_id":3.0}"#).unwrap();
        assert_eq!(env.recipient, Recipient::User(3));
    }

    #[test]
    fn missing_zero_and_odd_recipients_broadcast() {
        for raw in [
            r#"{"text":"hi"}"#,
            r#"{"text":"hi","recipient_id":0}"#,
            r#"{"text":"hi","recipient_id":"0"}"#,
            r#"{"text":"hi","recipient_id":""}"#,
            r#"{"text":"hi","recipient_id":"abc"}"#,
            r#"{"text":"hi","recipient_id":-4}"#,
            r#"{"text":"hi","recipient_id":null}"#,
            r#"{"text":"hi","recipient_id":true}"#,
            r#"{"text":"hi","recipient_id":{"id":2}}"#,
            r#"{"text":"hi","recipient_id":[2]}"#,
        ] {
            let env = parse_inbound(raw).unwrap();
            assert_eq!(env.recipient, Recipient::Broadcast, "input: {raw}");
        }
    }

    #[test]
    fn htmx_headers_are_ignored() {
        let raw = r#"{"text":"hello","recipient_id":"5","HEADERS":{"HX-Request":"true","HX-Trigger":"chat-form"}}"#;
        let env = parse_inbound(raw).unwrap();
        assert_eq!(env.text, "hello");
        assert_eq!(env.recipient, Recipient::User(5));
    }

    #[test]
    fn non_string_text_is_rejected() {
        assert!(parse_inbound(r#"{"text":123}"#).is_err());
    }

    #[test]
    fn missing_text_is_rejected() {
        assert!(parse_inbound(r#"{"recipient_id":2}"#).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(parse_inbound("{not json").is_err());
        assert!(parse_inbound(r#"["text"]"#).is_err());
    }

    #[test]
    fn into_routed_keeps_fields() {
        let now = Utc::now();
        let routed = parse_inbound(r#"{"text":"hi","recipient_id":2}"#)
            .unwrap()
            .into_routed(1, "Anna".to_string(), now);
        assert_eq!(routed.sender_id, 1);
        assert_eq!(routed.sender_name, "Anna");
        assert_eq!(routed.recipient, Recipient::User(2));
        assert_eq!(routed.text, "hi");
        assert_eq!(routed.created_at, now);
    }
}
