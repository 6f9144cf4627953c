//! Message fragment rendering.
//!
//! The template is parsed once at startup into literal and placeholder
//! segments and shared read-only with the dispatcher afterwards.

use std::fmt::Write as _;
use std::path::Path;

use crate::hub::RoutedMessage;

/// Default fragment: an htmx out-of-band swap appending one bubble to the
/// chat log.
pub const DEFAULT_MESSAGE_TEMPLATE: &str = r#"<div id="chat-messages" hx-swap-oob="beforeend"><div class="chat-message" data-sender-id="{{sender_id}}" data-recipient-id="{{recipient_id}}"><span class="chat-sender">{{sender_name}}</span><time datetime="{{created_at}}"></time><p class="chat-text">{{text}}</p></div></div>"#;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown template placeholder {{{{{0}}}}}")]
    UnknownPlaceholder(String),
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),
    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}

/// Turns a routed message into the payload written to clients.
pub trait DeliveryRenderer: Send + Sync + 'static {
    fn render(&self, message: &RoutedMessage) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    SenderId,
    SenderName,
    RecipientId,
    Text,
    CreatedAt,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sender_id" => Some(Self::SenderId),
            "sender_name" => Some(Self::SenderName),
            "recipient_id" => Some(Self::RecipientId),
            "text" => Some(Self::Text),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Parsed `{{placeholder}}` template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        // see default_template_parses
        Self::parse(DEFAULT_MESSAGE_TEMPLATE).unwrap_or(Self {
            segments: Vec::new(),
        })
    }
}

impl MessageTemplate {
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(RenderError::Unclosed(offset + start))?;
            let name = after_open[..end].trim();
            let field = Field::parse(name)
                .ok_or_else(|| RenderError::UnknownPlaceholder(name.to_string()))?;
            segments.push(Segment::Field(field));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Load the template from `path`, or the built-in one when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, RenderError> {
        match path {
            Some(path) => {
                let source = std::fs::read_to_string(path).map_err(|source| RenderError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let template = Self::parse(&source)?;
                tracing::info!("Message template loaded from {}", path.display());
                Ok(template)
            }
            None => Self::parse(DEFAULT_MESSAGE_TEMPLATE),
        }
    }
}

impl DeliveryRenderer for MessageTemplate {
    fn render(&self, message: &RoutedMessage) -> Result<String, RenderError> {
        let mut out = String::with_capacity(DEFAULT_MESSAGE_TEMPLATE.len() + message.text.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::SenderId) => write!(out, "{}", message.sender_id)?,
                Segment::Field(Field::SenderName) => out.push_str(&html_escape(&message.sender_name)),
                Segment::Field(Field::RecipientId) => write!(out, "{}", message.recipient.as_id())?,
                Segment::Field(Field::Text) => out.push_str(&html_escape(&message.text)),
                Segment::Field(Field::CreatedAt) => out.push_str(&message.timestamp()),
            }
        }
        Ok(out)
    }
}

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
