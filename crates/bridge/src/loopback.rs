use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use super::error::{BridgeError, BridgeResult};
use super::events::{EventHub, StreamSubscription};
use super::wire::{
    AppConfig, ConversationId, ConversationSummary, MessageRecord, ModelDescriptor,
    ProcessMessageRequest, ProcessReply, ProviderSettings, ReactionCounts, StreamChunk,
};
use super::{Backend, BoxFuture};

/// Produces the reply text one model gives to one user message.
pub type Responder = Arc<dyn Fn(&ModelDescriptor, &str) -> String + Send + Sync>;
pub type CodeRunner = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

const TITLE_MAX_CHARS: usize = 40;
const PREVIEW_MAX_CHARS: usize = 80;

struct StoredConversation {
    title: String,
    model: String,
    messages: Vec<MessageRecord>,
    updated_at: String,
}

struct LoopbackState {
    config: AppConfig,
    conversations: BTreeMap<ConversationId, StoredConversation>,
    current: Option<ConversationId>,
    next_conversation_id: i64,
    next_message_id: u64,
}

impl LoopbackState {
    fn next_message_id(&mut self) -> String {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.saturating_add(1);
        id.to_string()
    }

    fn current_conversation(&mut self, first_message: &str, model: &str) -> ConversationId {
        if let Some(current) = self.current
            && self.conversations.contains_key(&current)
        {
            return current;
        }

        let id = ConversationId::new(self.next_conversation_id);
        self.next_conversation_id = self.next_conversation_id.saturating_add(1);
        self.conversations.insert(
            id,
            StoredConversation {
                title: truncate_chars(first_message.trim(), TITLE_MAX_CHARS),
                model: model.to_string(),
                messages: Vec::new(),
                updated_at: display_timestamp(),
            },
        );
        self.current = Some(id);
        tracing::debug!(conversation_id = %id, "loopback filed a new conversation");
        id
    }

    fn push_record(
        &mut self,
        conversation_id: ConversationId,
        role: &str,
        content: String,
        model: Option<String>,
    ) {
        let id = self.next_message_id();
        let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
            return;
        };

        let timestamp = display_timestamp();
        conversation.updated_at = timestamp.clone();
        conversation.messages.push(MessageRecord {
            id,
            content,
            role: role.to_string(),
            model,
            timestamp,
            reactions: Some(ReactionCounts::default()),
        });
    }
}

/// In-process backend that answers with a [`Responder`] instead of a model
/// provider. It keeps conversations in memory and streams replies word by word
/// through the same event hub a native bridge would use.
pub struct LoopbackBackend {
    state: Mutex<LoopbackState>,
    hub: Arc<EventHub>,
    responder: Responder,
    code_runner: Option<CodeRunner>,
    chunk_delay: Option<Duration>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                config: AppConfig::default(),
                conversations: BTreeMap::new(),
                current: None,
                next_conversation_id: 1,
                next_message_id: 1,
            }),
            hub: EventHub::stream_response(),
            responder: Arc::new(|model: &ModelDescriptor, message: &str| {
                format!("({}) You said: {}", model.id, message)
            }),
            code_runner: None,
            chunk_delay: None,
        }
    }

    pub fn with_config(self, config: AppConfig) -> Self {
        self.state.lock().config = config;
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&ModelDescriptor, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn with_code_runner(
        mut self,
        runner: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.code_runner = Some(Arc::new(runner));
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn config(&self) -> AppConfig {
        self.state.lock().config.clone()
    }

    async fn answer(&self, request: ProcessMessageRequest) -> BridgeResult<ProcessReply> {
        let (targets, streaming, conversation_id) = {
            let mut state = self.state.lock();
            let targets = match request.selected_models.clone() {
                Some(models) if !models.is_empty() => models,
                _ => state.config.active_model().into_iter().collect(),
            };
            let Some(first_target) = targets.first() else {
                return Err(BridgeError::UnknownProvider {
                    stage: "loopback-resolve-targets",
                    provider: state.config.active_provider.clone(),
                });
            };

            let model_label = first_target.id.clone();
            let conversation_id = state.current_conversation(&request.message, &model_label);
            state.push_record(conversation_id, "user", request.message.clone(), None);
            (targets, state.config.streaming_enabled(), conversation_id)
        };

        let multi = targets.len() > 1;
        let replies = targets
            .iter()
            .map(|model| (model.id.clone(), (self.responder)(model, &request.message)))
            .collect::<Vec<_>>();

        if streaming {
            self.stream_replies(&replies, multi).await;
        }

        {
            let mut state = self.state.lock();
            for (model_id, reply) in &replies {
                state.push_record(
                    conversation_id,
                    "assistant",
                    reply.clone(),
                    Some(model_id.clone()),
                );
            }
        }

        if multi {
            Ok(ProcessReply::Multi {
                replies: replies.into_iter().collect(),
            })
        } else {
            let reply = replies
                .into_iter()
                .next()
                .map(|(_, reply)| reply)
                .unwrap_or_default();
            Ok(ProcessReply::single(reply))
        }
    }

    /// Emits every reply word by word. Multi-model replies are interleaved
    /// round-robin so listeners see concurrent streams on one channel.
    async fn stream_replies(&self, replies: &[(String, String)], multi: bool) {
        let mut pending = replies
            .iter()
            .map(|(model_id, reply)| (model_id.as_str(), reply.split_inclusive(' ')))
            .collect::<Vec<_>>();

        loop {
            let mut emitted = false;
            for (model_id, pieces) in pending.iter_mut() {
                let Some(piece) = pieces.next() else {
                    continue;
                };
                emitted = true;

                let payload = if multi {
                    StreamChunk::new(*model_id, piece).into_payload()
                } else {
                    serde_json::Value::String(piece.to_string())
                };
                self.hub.emit(payload);

                if let Some(delay) = self.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
            }

            if !emitted {
                break;
            }
        }
    }

    fn summaries(&self) -> Vec<ConversationSummary> {
        let state = self.state.lock();
        state
            .conversations
            .iter()
            .rev()
            .map(|(id, conversation)| ConversationSummary {
                id: *id,
                title: conversation.title.clone(),
                preview: conversation
                    .messages
                    .last()
                    .map(|message| truncate_chars(&message.content, PREVIEW_MAX_CHARS))
                    .unwrap_or_default(),
                model: conversation.model.clone(),
                message_count: conversation.messages.len(),
                timestamp: conversation.updated_at.clone(),
            })
            .collect()
    }
}

impl Backend for LoopbackBackend {
    fn get_config(&self) -> BoxFuture<'_, BridgeResult<AppConfig>> {
        let config = self.config();
        async move { Ok(config) }.boxed()
    }

    fn subscribe_stream(&self) -> BoxFuture<'_, BridgeResult<StreamSubscription>> {
        let subscription = self.hub.subscribe();
        async move { Ok(subscription) }.boxed()
    }

    fn process_message(
        &self,
        request: ProcessMessageRequest,
    ) -> BoxFuture<'_, BridgeResult<ProcessReply>> {
        self.answer(request).boxed()
    }

    fn get_chat_history(&self) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>> {
        let messages = {
            let state = self.state.lock();
            state
                .current
                .and_then(|id| state.conversations.get(&id))
                .map(|conversation| conversation.messages.clone())
                .unwrap_or_default()
        };
        async move { Ok(messages) }.boxed()
    }

    fn load_conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>> {
        let result = {
            let mut state = self.state.lock();
            match state.conversations.get(&conversation_id) {
                Some(conversation) => {
                    let messages = conversation.messages.clone();
                    state.current = Some(conversation_id);
                    Ok(messages)
                }
                None => Err(BridgeError::NotFound {
                    stage: "loopback-load-conversation",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }),
            }
        };
        async move { result }.boxed()
    }

    fn get_conversations(&self) -> BoxFuture<'_, BridgeResult<Vec<ConversationSummary>>> {
        let summaries = self.summaries();
        async move { Ok(summaries) }.boxed()
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BridgeResult<()>> {
        let result = {
            let mut state = self.state.lock();
            if state.conversations.remove(&conversation_id).is_none() {
                Err(BridgeError::NotFound {
                    stage: "loopback-delete-conversation",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                })
            } else {
                if state.current == Some(conversation_id) {
                    state.current = None;
                }
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn clear_chat_history(&self) -> BoxFuture<'_, BridgeResult<()>> {
        self.state.lock().current = None;
        async move { Ok(()) }.boxed()
    }

    fn update_provider_settings(
        &self,
        provider: String,
        settings: ProviderSettings,
    ) -> BoxFuture<'_, BridgeResult<()>> {
        self.state.lock().config.providers.insert(provider, settings);
        async move { Ok(()) }.boxed()
    }

    fn set_active_provider(&self, provider: String) -> BoxFuture<'_, BridgeResult<()>> {
        let result = {
            let mut state = self.state.lock();
            if state.config.providers.contains_key(&provider) {
                state.config.active_provider = provider;
                Ok(())
            } else {
                Err(BridgeError::UnknownProvider {
                    stage: "loopback-set-active-provider",
                    provider,
                })
            }
        };
        async move { result }.boxed()
    }

    fn run_code(&self, code: String) -> BoxFuture<'_, BridgeResult<String>> {
        let result = match &self.code_runner {
            Some(runner) => {
                runner(&code).map_err(|message| BridgeError::rejected("run_code", message, None))
            }
            None => Err(BridgeError::rejected(
                "run_code",
                "no code runtime is attached",
                None,
            )),
        };
        async move { result }.boxed()
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}

fn display_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}
