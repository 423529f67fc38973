use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use murmur_bridge::{
    AppConfig, Backend, BoxFuture, BridgeError, BridgeResult, ConversationId, ConversationSummary,
    EventHub, MessageRecord, ProcessMessageRequest, ProcessReply, ProviderSettings,
    StreamSubscription,
};
use parking_lot::Mutex;

/// How the next `process_message` call behaves.
pub enum Exchange {
    /// Emits `chunks` on the stream hub, then resolves with `reply`.
    Reply {
        chunks: Vec<serde_json::Value>,
        reply: ProcessReply,
    },
    Reject(BridgeError),
    /// Never resolves.
    Hang,
}

impl Exchange {
    pub fn reply(reply: ProcessReply) -> Self {
        Self::Reply {
            chunks: Vec::new(),
            reply,
        }
    }

    pub fn streamed(chunks: Vec<serde_json::Value>, reply: ProcessReply) -> Self {
        Self::Reply { chunks, reply }
    }
}

/// Backend double with scripted replies and recorded requests.
pub struct ScriptedBackend {
    hub: Arc<EventHub>,
    config: Mutex<AppConfig>,
    config_error: Mutex<Option<BridgeError>>,
    exchanges: Mutex<VecDeque<Exchange>>,
    requests: Mutex<Vec<ProcessMessageRequest>>,
    subscribers_at_request: Mutex<Vec<usize>>,
    history: Mutex<Vec<MessageRecord>>,
    conversation_messages: Mutex<HashMap<ConversationId, Vec<MessageRecord>>>,
    conversations: Mutex<Vec<ConversationSummary>>,
    history_error: Mutex<Option<BridgeError>>,
    deleted: Mutex<Vec<ConversationId>>,
    cleared: Mutex<usize>,
    code_result: Mutex<Option<Result<String, String>>>,
}

impl ScriptedBackend {
    /// One `openai` provider, active model `m1`, models `m1` and `m2`, no streaming.
    pub fn new() -> Self {
        Self {
            hub: EventHub::stream_response(),
            config: Mutex::new(test_config(false)),
            config_error: Mutex::new(None),
            exchanges: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            subscribers_at_request: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            conversation_messages: Mutex::new(HashMap::new()),
            conversations: Mutex::new(Vec::new()),
            history_error: Mutex::new(None),
            deleted: Mutex::new(Vec::new()),
            cleared: Mutex::new(0),
            code_result: Mutex::new(None),
        }
    }

    pub fn streaming() -> Self {
        let backend = Self::new();
        backend.set_config(test_config(true));
        backend
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn set_config(&self, config: AppConfig) {
        *self.config.lock() = config;
    }

    /// Fails the next `get_config` call.
    pub fn fail_config(&self, error: BridgeError) {
        *self.config_error.lock() = Some(error);
    }

    /// Fails the next history or conversation-list call.
    pub fn fail_history(&self, error: BridgeError) {
        *self.history_error.lock() = Some(error);
    }

    pub fn push(&self, exchange: Exchange) {
        self.exchanges.lock().push_back(exchange);
    }

    pub fn requests(&self) -> Vec<ProcessMessageRequest> {
        self.requests.lock().clone()
    }

    /// Stream listener count observed when each request arrived.
    pub fn subscribers_at_request(&self) -> Vec<usize> {
        self.subscribers_at_request.lock().clone()
    }

    pub fn set_history(&self, records: Vec<MessageRecord>) {
        *self.history.lock() = records;
    }

    pub fn set_conversation(
        &self,
        summary: ConversationSummary,
        records: Vec<MessageRecord>,
    ) {
        self.conversation_messages.lock().insert(summary.id, records);
        self.conversations.lock().push(summary);
    }

    pub fn deleted(&self) -> Vec<ConversationId> {
        self.deleted.lock().clone()
    }

    pub fn cleared(&self) -> usize {
        *self.cleared.lock()
    }

    pub fn set_code_result(&self, result: Result<String, String>) {
        *self.code_result.lock() = Some(result);
    }
}

impl Backend for ScriptedBackend {
    fn get_config(&self) -> BoxFuture<'_, BridgeResult<AppConfig>> {
        Box::pin(async move {
            if let Some(error) = self.config_error.lock().take() {
                return Err(error);
            }
            Ok(self.config.lock().clone())
        })
    }

    fn subscribe_stream(&self) -> BoxFuture<'_, BridgeResult<StreamSubscription>> {
        Box::pin(async move { Ok(self.hub.subscribe()) })
    }

    fn process_message(
        &self,
        request: ProcessMessageRequest,
    ) -> BoxFuture<'_, BridgeResult<ProcessReply>> {
        Box::pin(async move {
            self.requests.lock().push(request);
            self.subscribers_at_request
                .lock()
                .push(self.hub.subscriber_count());

            let exchange = self.exchanges.lock().pop_front();
            match exchange {
                Some(Exchange::Reply { chunks, reply }) => {
                    for chunk in chunks {
                        self.hub.emit(chunk);
                    }
                    Ok(reply)
                }
                Some(Exchange::Reject(error)) => Err(error),
                Some(Exchange::Hang) => futures::future::pending().await,
                None => Ok(ProcessReply::single("")),
            }
        })
    }

    fn get_chat_history(&self) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            if let Some(error) = self.history_error.lock().take() {
                return Err(error);
            }
            Ok(self.history.lock().clone())
        })
    }

    fn load_conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BridgeResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            if let Some(error) = self.history_error.lock().take() {
                return Err(error);
            }
            self.conversation_messages
                .lock()
                .get(&conversation_id)
                .cloned()
                .ok_or(BridgeError::NotFound {
                    stage: "scripted-load-conversation",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                })
        })
    }

    fn get_conversations(&self) -> BoxFuture<'_, BridgeResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            if let Some(error) = self.history_error.lock().take() {
                return Err(error);
            }
            Ok(self.conversations.lock().clone())
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.deleted.lock().push(conversation_id);
            self.conversations
                .lock()
                .retain(|summary| summary.id != conversation_id);
            self.conversation_messages.lock().remove(&conversation_id);
            Ok(())
        })
    }

    fn clear_chat_history(&self) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            *self.cleared.lock() += 1;
            self.history.lock().clear();
            Ok(())
        })
    }

    fn update_provider_settings(
        &self,
        provider: String,
        settings: ProviderSettings,
    ) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.config.lock().providers.insert(provider, settings);
            Ok(())
        })
    }

    fn set_active_provider(&self, provider: String) -> BoxFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            let mut config = self.config.lock();
            if !config.providers.contains_key(&provider) {
                return Err(BridgeError::UnknownProvider {
                    stage: "scripted-set-active-provider",
                    provider,
                });
            }
            config.active_provider = provider;
            Ok(())
        })
    }

    fn run_code(&self, _code: String) -> BoxFuture<'_, BridgeResult<String>> {
        Box::pin(async move {
            match self.code_result.lock().clone() {
                Some(Ok(output)) => Ok(output),
                Some(Err(message)) => Err(BridgeError::rejected("run_code", message, None)),
                None => Ok(String::new()),
            }
        })
    }
}

pub fn test_config(streaming: bool) -> AppConfig {
    let mut config = AppConfig {
        active_provider: "openai".to_string(),
        providers: Default::default(),
    };
    config.providers.insert(
        "openai".to_string(),
        ProviderSettings::new("m1")
            .with_streaming(streaming)
            .with_available_models(["m1", "m2"]),
    );
    config
}

pub fn record(id: &str, role: &str, content: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        content: content.to_string(),
        role: role.to_string(),
        model: None,
        timestamp: "10:00:00".to_string(),
        reactions: None,
    }
}

pub fn summary(id: i64, title: &str) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId::new(id),
        title: title.to_string(),
        preview: String::new(),
        model: "m1".to_string(),
        message_count: 0,
        timestamp: String::new(),
    }
}
