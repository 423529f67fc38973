use std::fmt;

use murmur_bridge::{BridgeError, ConversationId};

/// Which class of operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Send,
    History,
    CodeExecution,
}

/// User-facing error value rendered as a dismissible banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Normalizes a bridge rejection. Backend-provided text wins over the
    /// generic `fallback` so the banner says what actually went wrong.
    pub fn from_bridge(kind: ErrorKind, fallback: &str, error: &BridgeError) -> Self {
        let message = match error {
            BridgeError::Rejected { message, .. } if !message.trim().is_empty() => {
                message.clone()
            }
            _ => fallback.to_string(),
        };
        let details = match error {
            BridgeError::Rejected { details, .. } => details.clone(),
            other => Some(other.to_string()),
        };

        Self {
            kind,
            message,
            details,
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(formatter, "{} ({details})", self.message),
            None => formatter.write_str(&self.message),
        }
    }
}

impl std::error::Error for ChatError {}

/// Operation the banner's retry action re-runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedOperation {
    Send { text: String },
    LoadMessages { conversation_id: Option<ConversationId> },
    LoadConversations,
    LoadModels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSlot {
    pub error: ChatError,
    pub retry: Option<FailedOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_text_is_preferred_over_fallback() {
        let error = BridgeError::rejected(
            "process_message",
            "rate limited",
            Some("retry after 30s".to_string()),
        );
        let chat_error = ChatError::from_bridge(ErrorKind::Send, "send failed", &error);

        assert_eq!(chat_error.message, "rate limited");
        assert_eq!(chat_error.details.as_deref(), Some("retry after 30s"));
        assert_eq!(chat_error.to_string(), "rate limited (retry after 30s)");
    }

    #[test]
    fn non_rejections_use_fallback_with_cause_as_details() {
        let error = BridgeError::NotFound {
            stage: "test",
            entity: "conversation",
            id: "9".to_string(),
        };
        let chat_error =
            ChatError::from_bridge(ErrorKind::History, "Failed to load messages", &error);

        assert_eq!(chat_error.message, "Failed to load messages");
        assert_eq!(
            chat_error.details.as_deref(),
            Some("conversation '9' was not found")
        );
    }
}
