use std::fmt;

use murmur_bridge::{MessageRecord, ReactionCounts};

/// Stable identifier for one message.
///
/// Locally created messages start out provisional; anything loaded from the
/// backend carries the backend's durable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Provisional(u64),
    Durable(String),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(raw) => write!(formatter, "temp-{raw}"),
            Self::Durable(raw) => formatter.write_str(raw),
        }
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parses a backend role string. Unknown roles are kept as system rows so
    /// they render but never become retry targets.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reactions {
    pub thumbs_up: u32,
}

impl From<ReactionCounts> for Reactions {
    fn from(value: ReactionCounts) -> Self {
        Self {
            thumbs_up: value.thumbs_up,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub model: Option<String>,
    pub reactions: Reactions,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: timestamp.into(),
            model: None,
            reactions: Reactions::default(),
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, timestamp)
    }

    /// Empty assistant message that a stream fills in.
    pub fn assistant_placeholder(
        id: MessageId,
        model: Option<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self::new(id, Role::Assistant, String::new(), timestamp).with_model(model)
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: MessageId::Durable(record.id),
            role: Role::from_wire(&record.role),
            content: record.content,
            timestamp: record.timestamp,
            model: record.model,
            reactions: record.reactions.map(Reactions::from).unwrap_or_default(),
        }
    }
}

/// In-flight response state shown by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamingState {
    pub is_streaming: bool,
    /// Model whose output arrived most recently, so the typing indicator
    /// attaches to the right message.
    pub active_model_id: Option<String>,
}

impl StreamingState {
    pub fn is_idle(&self) -> bool {
        !self.is_streaming && self.active_model_id.is_none()
    }
}

pub(crate) fn display_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
