#![deny(unsafe_code)]

//! Request/event contract between the chat client and its native backend.
//!
//! Everything the client cannot do on its own (message persistence, model
//! invocation, code execution) sits behind [`Backend`]. Requests are async and
//! may reject; incremental response content arrives on the
//! [`STREAM_RESPONSE_EVENT`] subscription.

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod events;
pub mod loopback;
pub mod wire;

pub use error::{BridgeError, BridgeResult};
pub use events::{EventHub, StreamSubscription};
pub use loopback::{LoopbackBackend, Responder};
pub use wire::{
    AppConfig, ConversationId, ConversationSummary, MessageRecord, ModelDescriptor,
    ProcessMessageRequest, ProcessReply, ProviderSettings, ReactionCounts, STREAM_RESPONSE_EVENT,
    StreamChunk,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait Backend: Send + Sync {
    fn get_config(&self) -> BoxFuture<'_, BridgeResult<AppConfig>>;

    /// Registers a listener on [`STREAM_RESPONSE_EVENT`]. Callers must hold the
    /// returned handle for as long as they want chunks delivered.
    fn subscribe_stream(&self) -> BoxFuture<'_, BridgeResult<StreamSubscription>>;

    fn process_message(
        &self,
        request: ProcessMessageRequest,
    ) -> BoxFuture<'_, BridgeResult<ProcessReply>>;

    /// Messages of the chat that has not been filed as a conversation yet.
    fn get_chat_history(&self) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>>;

    fn load_conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>>;

    fn get_conversations(&self) -> BoxFuture<'_, BridgeResult<Vec<ConversationSummary>>>;

    fn delete_conversation(&self, conversation_id: ConversationId)
    -> BoxFuture<'_, BridgeResult<()>>;

    fn clear_chat_history(&self) -> BoxFuture<'_, BridgeResult<()>>;

    fn update_provider_settings(
        &self,
        provider: String,
        settings: ProviderSettings,
    ) -> BoxFuture<'_, BridgeResult<()>>;

    fn set_active_provider(&self, provider: String) -> BoxFuture<'_, BridgeResult<()>>;

    fn run_code(&self, code: String) -> BoxFuture<'_, BridgeResult<String>>;
}
