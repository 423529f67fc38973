use murmur_bridge::ConversationId;

use crate::error::ChatError;
use crate::message::{MessageId, StreamingState};

/// Change notifications for the presentation layer. Payloads identify what
/// changed; subscribers read current values back from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageAppended { message_id: MessageId },
    MessageUpdated { message_id: MessageId },
    MessagesReplaced { conversation_id: Option<ConversationId> },
    StreamingChanged(StreamingState),
    ErrorRaised(ChatError),
    ErrorCleared,
    ConversationsReloaded { count: usize },
    ModelsReloaded,
}
