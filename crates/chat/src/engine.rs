use std::collections::HashMap;
use std::sync::Arc;

use murmur_bridge::{
    AppConfig, Backend, ConversationId, ModelDescriptor, ProcessMessageRequest, ProcessReply,
    ProviderSettings, StreamSubscription,
};
use tokio::sync::broadcast;

use crate::error::{ChatError, ErrorKind, ErrorSlot, FailedOperation};
use crate::events::ChatEvent;
use crate::message::{Message, MessageId, StreamingState, display_timestamp};
use crate::models::ModelRegistry;
use crate::settings::SettingsStore;
use crate::store::{ConversationRegistry, MessageStore};
use crate::stream::{StreamMode, StreamRouter};

const SEND_FAILED: &str = "An error occurred while processing your message.";

/// Outcome of [`ChatEngine::send_message`] and [`ChatEngine::retry_last`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The request ran to completion and its replies are in the store.
    Completed,
    /// The request ran and failed; the error slot holds the reason.
    Failed,
    /// Nothing was sent: empty input, no previous attempt, or a response
    /// still in flight.
    Skipped,
}

/// Owns the active conversation and drives request/stream reconciliation.
///
/// All mutation goes through `&mut self`, so at most one request is in flight
/// and stream chunks are applied by the same task that issued the request.
pub struct ChatEngine {
    backend: Arc<dyn Backend>,
    settings: SettingsStore,
    messages: MessageStore,
    conversations: ConversationRegistry,
    models: ModelRegistry,
    streaming: StreamingState,
    input: String,
    last_attempted_message: String,
    retrying_message_id: Option<MessageId>,
    error: Option<ErrorSlot>,
    is_loading: bool,
    next_message_id: u64,
    events_tx: broadcast::Sender<ChatEvent>,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn Backend>, settings: SettingsStore) -> Self {
        let (events_tx, _) = broadcast::channel(settings.settings().event_capacity);

        Self {
            backend,
            settings,
            messages: MessageStore::new(),
            conversations: ConversationRegistry::new(),
            models: ModelRegistry::new(),
            streaming: StreamingState::default(),
            input: String::new(),
            last_attempted_message: String::new(),
            retrying_message_id: None,
            error: None,
            is_loading: false,
            next_message_id: 1,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events_tx.subscribe()
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn conversations(&self) -> &ConversationRegistry {
        &self.conversations
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    pub fn streaming(&self) -> &StreamingState {
        &self.streaming
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn last_attempted_message(&self) -> &str {
        &self.last_attempted_message
    }

    pub fn retrying_message_id(&self) -> Option<&MessageId> {
        self.retrying_message_id.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorSlot> {
        self.error.as_ref()
    }

    /// Loads models, the conversation list and the current chat. Failures
    /// land in the error slot and do not stop the remaining steps.
    pub async fn initialize(&mut self) {
        let _ = self.load_models().await;
        let _ = self.reload_conversations().await;
        let _ = self.load_messages().await;
    }

    /// Sends the current input draft.
    pub async fn send_input(&mut self) -> SendOutcome {
        let text = self.input.clone();
        self.send_message(&text).await
    }

    /// Appends `text` as a user message and requests replies from the
    /// selected models. Blank text and sends during an in-flight response are
    /// ignored and keep the input draft.
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            tracing::debug!("ignoring blank message");
            return SendOutcome::Skipped;
        }
        if self.streaming.is_streaming {
            tracing::debug!("ignoring send while a response is in flight");
            return SendOutcome::Skipped;
        }

        let message_id = self.allocate_message_id();
        self.messages.append(Message::user(
            message_id.clone(),
            text,
            display_timestamp(),
        ));
        self.last_attempted_message = text.to_string();
        self.input.clear();
        self.emit(ChatEvent::MessageAppended { message_id });

        self.process_message(text, None).await
    }

    /// Re-sends the last attempted text, rewriting the most recent assistant
    /// message in place. With no assistant message yet it sends fresh.
    pub async fn retry_last(&mut self) -> SendOutcome {
        if self.streaming.is_streaming {
            tracing::debug!("ignoring retry while a response is in flight");
            return SendOutcome::Skipped;
        }
        if self.last_attempted_message.trim().is_empty() {
            tracing::debug!("nothing to retry");
            return SendOutcome::Skipped;
        }

        let text = self.last_attempted_message.clone();
        let target = self
            .messages
            .last_assistant()
            .map(|message| message.id.clone());

        tracing::info!(retry_target = ?target, "retrying last message");
        self.process_message(&text, target).await
    }

    /// Runs one request for `text`. With `existing`, that assistant message
    /// is cleared and refilled rather than appending a new reply.
    ///
    /// Streaming state is reset and the stream listener released on every
    /// exit path.
    pub async fn process_message(
        &mut self,
        text: &str,
        existing: Option<MessageId>,
    ) -> SendOutcome {
        self.clear_error();
        self.retrying_message_id = existing.clone();

        let outcome = self.exchange(text, existing).await;
        self.finish_streaming();

        match outcome {
            Ok(()) => {
                if self.settings.settings().reload_after_send {
                    let _ = self.load_messages().await;
                }
                let _ = self.reload_conversations().await;
                SendOutcome::Completed
            }
            Err(error) => {
                self.raise(
                    error,
                    Some(FailedOperation::Send {
                        text: text.to_string(),
                    }),
                );
                SendOutcome::Failed
            }
        }
    }

    async fn exchange(&mut self, text: &str, existing: Option<MessageId>) -> Result<(), ChatError> {
        let config = self.backend.get_config().await.map_err(|error| {
            ChatError::from_bridge(ErrorKind::Config, "Failed to load configuration", &error)
        })?;
        let targets = self.target_models(&config)?;
        let streaming_enabled = config.streaming_enabled();

        let reused = self.reuse_replies(existing.as_ref(), &targets);
        for message_id in reused.values() {
            if self.messages.update_content(message_id, "") {
                self.emit(ChatEvent::MessageUpdated {
                    message_id: message_id.clone(),
                });
            }
        }

        let mut router = StreamRouter::new(StreamMode::for_targets(&targets));
        let mut request = ProcessMessageRequest::new(text);
        if !self.models.selected().is_empty() {
            request = request.with_models(targets.clone());
        }

        tracing::info!(
            target_count = targets.len(),
            streaming = streaming_enabled,
            retry = existing.is_some(),
            "processing message"
        );

        let reply = if streaming_enabled {
            for target in &targets {
                let message_id = match reused.get(&target.id) {
                    Some(message_id) => message_id.clone(),
                    None => self.append_reply(&target.id, String::new()),
                };
                router.bind(target.id.clone(), message_id);
            }
            self.streaming = StreamingState {
                is_streaming: true,
                active_model_id: targets.first().map(|target| target.id.clone()),
            };
            self.emit(ChatEvent::StreamingChanged(self.streaming.clone()));

            let subscription = self.backend.subscribe_stream().await.map_err(|error| {
                ChatError::from_bridge(ErrorKind::Send, "Failed to listen for responses", &error)
            })?;
            let reply = self.stream_reply(request, subscription, &router).await?;

            // Models that produced no chunks get the final reply text.
            for (index, target) in targets.iter().enumerate() {
                let Some(message_id) = router.placeholder(&target.id) else {
                    continue;
                };
                let is_empty = self
                    .messages
                    .get(message_id)
                    .is_some_and(|message| message.content.is_empty());
                if let Some(text) = reply_text(&reply, index, &target.id)
                    && is_empty
                    && !text.is_empty()
                {
                    self.messages.update_content(message_id, text);
                    self.emit(ChatEvent::MessageUpdated {
                        message_id: message_id.clone(),
                    });
                }
            }
            reply
        } else {
            let reply = self.await_reply(request).await?;
            for (index, target) in targets.iter().enumerate() {
                let Some(text) = reply_text(&reply, index, &target.id) else {
                    tracing::warn!(model_id = %target.id, "reply is missing a requested model");
                    continue;
                };
                match reused.get(&target.id) {
                    Some(message_id) => {
                        self.messages.update_content(message_id, text);
                        self.emit(ChatEvent::MessageUpdated {
                            message_id: message_id.clone(),
                        });
                    }
                    None => {
                        self.append_reply(&target.id, text.to_string());
                    }
                }
            }
            reply
        };

        if let ProcessReply::Multi { replies } = &reply {
            for model_id in replies.keys() {
                if !targets.iter().any(|target| &target.id == model_id) {
                    tracing::warn!(model_id = %model_id, "dropping reply for unrequested model");
                }
            }
        }

        Ok(())
    }

    /// Applies stream chunks while the request is pending, then drains chunks
    /// that were queued before the reply resolved.
    async fn stream_reply(
        &mut self,
        request: ProcessMessageRequest,
        mut subscription: StreamSubscription,
        router: &StreamRouter,
    ) -> Result<ProcessReply, ChatError> {
        let backend = Arc::clone(&self.backend);
        let timeout = self.settings.settings().request_timeout();
        let reply = guarded_request(backend.as_ref(), request, timeout);
        tokio::pin!(reply);

        let mut listening = true;
        let outcome = loop {
            if !listening {
                break reply.as_mut().await;
            }
            tokio::select! {
                biased;
                payload = subscription.recv() => match payload {
                    Some(payload) => self.apply_payload(router, payload),
                    None => {
                        tracing::warn!("stream closed before the reply arrived");
                        listening = false;
                    }
                },
                outcome = reply.as_mut() => break outcome,
            }
        };

        while let Some(payload) = subscription.try_recv() {
            self.apply_payload(router, payload);
        }
        subscription.unsubscribe();

        outcome
    }

    async fn await_reply(&self, request: ProcessMessageRequest) -> Result<ProcessReply, ChatError> {
        let timeout = self.settings.settings().request_timeout();
        guarded_request(self.backend.as_ref(), request, timeout).await
    }

    fn apply_payload(&mut self, router: &StreamRouter, payload: serde_json::Value) {
        let Some(routed) = router.route(payload) else {
            return;
        };

        if !self.messages.append_content(&routed.message_id, &routed.chunk) {
            tracing::warn!(message_id = %routed.message_id, "dropping chunk for missing message");
            return;
        }

        if self.streaming.active_model_id.as_deref() != Some(routed.model_id.as_str()) {
            self.streaming.active_model_id = Some(routed.model_id);
            self.emit(ChatEvent::StreamingChanged(self.streaming.clone()));
        }
        self.emit(ChatEvent::MessageUpdated {
            message_id: routed.message_id,
        });
    }

    /// Registry selection, or the backend's active model when nothing is
    /// selected.
    fn target_models(&self, config: &AppConfig) -> Result<Vec<ModelDescriptor>, ChatError> {
        let selected = self.models.selected_descriptors();
        if !selected.is_empty() {
            return Ok(selected);
        }

        config.active_model().map(|model| vec![model]).ok_or_else(|| {
            ChatError::new(ErrorKind::Config, "No model is configured").with_details(format!(
                "active provider `{}` has no settings",
                config.active_provider
            ))
        })
    }

    /// Messages a retry rewrites, keyed by target model. The retried message
    /// keeps its own model when that model is still a target and falls back to
    /// the first target otherwise.
    fn reuse_replies(
        &mut self,
        existing: Option<&MessageId>,
        targets: &[ModelDescriptor],
    ) -> HashMap<String, MessageId> {
        let mut reused = HashMap::new();
        let Some(existing) = existing else {
            return reused;
        };
        let Some(existing_message) = self.messages.get(existing) else {
            tracing::warn!(message_id = %existing, "retry target is gone, appending a new reply");
            return reused;
        };
        let is_target = |model_id: &str| targets.iter().any(|target| target.id == model_id);

        let existing_model = existing_message
            .model
            .clone()
            .filter(|model_id| is_target(model_id))
            .or_else(|| targets.first().map(|target| target.id.clone()));
        let Some(existing_model) = existing_model else {
            return reused;
        };
        reused.insert(existing_model.clone(), existing.clone());

        let in_latest_turn = self
            .messages
            .latest_turn_replies()
            .any(|message| &message.id == existing);
        if in_latest_turn {
            for message in self.messages.latest_turn_replies() {
                if let Some(model_id) = &message.model
                    && is_target(model_id)
                    && !reused.contains_key(model_id)
                {
                    reused.insert(model_id.clone(), message.id.clone());
                }
            }
        }

        let relabel = self
            .messages
            .get(existing)
            .is_some_and(|message| message.model.as_deref() != Some(existing_model.as_str()));
        if relabel {
            self.messages.set_model(existing, existing_model);
        }
        reused
    }

    fn append_reply(&mut self, model_id: &str, content: String) -> MessageId {
        let message_id = self.allocate_message_id();
        let mut message = Message::assistant_placeholder(
            message_id.clone(),
            Some(model_id.to_string()),
            display_timestamp(),
        );
        message.content = content;
        self.messages.append(message);
        self.emit(ChatEvent::MessageAppended {
            message_id: message_id.clone(),
        });
        message_id
    }

    fn finish_streaming(&mut self) {
        self.retrying_message_id = None;
        if !self.streaming.is_idle() {
            self.streaming = StreamingState::default();
            self.emit(ChatEvent::StreamingChanged(self.streaming.clone()));
        }
    }

    /// Adds one thumbs-up to `message_id`.
    pub fn react(&mut self, message_id: &MessageId) -> Option<u32> {
        let count = self.messages.react(message_id)?;
        self.emit(ChatEvent::MessageUpdated {
            message_id: message_id.clone(),
        });
        Some(count)
    }

    pub async fn load_models(&mut self) -> Result<(), ChatError> {
        match self.models.load(self.backend.as_ref()).await {
            Ok(()) => {
                self.emit(ChatEvent::ModelsReloaded);
                Ok(())
            }
            Err(error) => {
                self.emit(ChatEvent::ModelsReloaded);
                self.raise(error.clone(), Some(FailedOperation::LoadModels));
                Err(error)
            }
        }
    }

    /// Replaces the message list with the active conversation's messages, or
    /// the unfiled chat history when no conversation is active.
    pub async fn load_messages(&mut self) -> Result<(), ChatError> {
        let conversation_id = self.conversations.active();
        self.is_loading = true;

        let records = match conversation_id {
            Some(conversation_id) => {
                self.backend
                    .load_conversation_messages(conversation_id)
                    .await
            }
            None => self.backend.get_chat_history().await,
        };
        self.is_loading = false;

        match records {
            Ok(records) => {
                tracing::debug!(
                    conversation_id = ?conversation_id,
                    message_count = records.len(),
                    "loaded messages"
                );
                self.messages
                    .replace_all(records.into_iter().map(Message::from).collect());
                self.emit(ChatEvent::MessagesReplaced { conversation_id });
                Ok(())
            }
            Err(error) => {
                let error =
                    ChatError::from_bridge(ErrorKind::History, "Failed to load messages", &error);
                self.raise(
                    error.clone(),
                    Some(FailedOperation::LoadMessages { conversation_id }),
                );
                Err(error)
            }
        }
    }

    /// Makes `conversation_id` active and loads its messages. `None` switches
    /// to the unfiled chat.
    pub async fn select_conversation(
        &mut self,
        conversation_id: Option<ConversationId>,
    ) -> Result<(), ChatError> {
        if self.streaming.is_streaming {
            tracing::debug!("ignoring conversation switch while a response is in flight");
            return Ok(());
        }

        self.conversations.set_active(conversation_id);
        self.load_messages().await
    }

    pub async fn reload_conversations(&mut self) -> Result<(), ChatError> {
        match self.backend.get_conversations().await {
            Ok(summaries) => {
                let count = summaries.len();
                self.conversations.replace_all(summaries);
                self.emit(ChatEvent::ConversationsReloaded { count });
                Ok(())
            }
            Err(error) => {
                let error = ChatError::from_bridge(
                    ErrorKind::History,
                    "Failed to load conversations",
                    &error,
                );
                self.raise(error.clone(), Some(FailedOperation::LoadConversations));
                Err(error)
            }
        }
    }

    /// Deletes a conversation. Deleting the active one falls back to an empty
    /// unfiled chat.
    pub async fn delete_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<(), ChatError> {
        if let Err(error) = self.backend.delete_conversation(conversation_id).await {
            let error =
                ChatError::from_bridge(ErrorKind::History, "Failed to delete conversation", &error);
            self.raise(error.clone(), None);
            return Err(error);
        }

        tracing::info!(conversation_id = %conversation_id, "deleted conversation");
        self.conversations.remove(conversation_id);
        if self.conversations.active() == Some(conversation_id) {
            self.conversations.set_active(None);
            self.messages.clear();
            self.emit(ChatEvent::MessagesReplaced {
                conversation_id: None,
            });
        }

        self.reload_conversations().await
    }

    /// Starts a fresh chat. The backend files the current one, if any.
    pub async fn new_chat(&mut self) -> Result<(), ChatError> {
        if self.streaming.is_streaming {
            tracing::debug!("ignoring new chat while a response is in flight");
            return Ok(());
        }

        if let Err(error) = self.backend.clear_chat_history().await {
            let error =
                ChatError::from_bridge(ErrorKind::History, "Failed to clear chat history", &error);
            self.raise(error.clone(), None);
            return Err(error);
        }

        self.conversations.set_active(None);
        self.messages.clear();
        self.last_attempted_message.clear();
        self.emit(ChatEvent::MessagesReplaced {
            conversation_id: None,
        });

        self.reload_conversations().await
    }

    pub async fn clear_chat(&mut self) -> Result<(), ChatError> {
        self.new_chat().await
    }

    pub async fn update_provider_settings(
        &mut self,
        provider: &str,
        settings: ProviderSettings,
    ) -> Result<(), ChatError> {
        if let Err(error) = self
            .backend
            .update_provider_settings(provider.to_string(), settings)
            .await
        {
            let error =
                ChatError::from_bridge(ErrorKind::Config, "Failed to save provider settings", &error);
            self.raise(error.clone(), None);
            return Err(error);
        }

        tracing::info!(provider, "updated provider settings");
        self.load_models().await
    }

    pub async fn set_active_provider(&mut self, provider: &str) -> Result<(), ChatError> {
        if let Err(error) = self
            .backend
            .set_active_provider(provider.to_string())
            .await
        {
            let error =
                ChatError::from_bridge(ErrorKind::Config, "Failed to switch provider", &error);
            self.raise(error.clone(), None);
            return Err(error);
        }

        tracing::info!(provider, "switched active provider");
        self.load_models().await
    }

    /// Runs a code block through the backend. Failures come back inline as
    /// `Error: ...` output and never reach the error slot.
    pub async fn run_code(&self, code: &str) -> String {
        match self.backend.run_code(code.to_string()).await {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(stage = error.stage(), error = %error, "code execution failed");
                let error = ChatError::from_bridge(
                    ErrorKind::CodeExecution,
                    "Code execution failed",
                    &error,
                );
                format!("Error: {}", error.message)
            }
        }
    }

    pub fn dismiss_error(&mut self) {
        self.clear_error();
    }

    /// Re-runs the operation behind the current error, if it has one.
    pub async fn retry_failed(&mut self) -> bool {
        let Some(operation) = self.error.as_ref().and_then(|slot| slot.retry.clone()) else {
            return false;
        };
        self.clear_error();

        match operation {
            FailedOperation::Send { .. } => {
                self.retry_last().await != SendOutcome::Skipped
            }
            FailedOperation::LoadMessages { conversation_id } => {
                if self.conversations.active() != conversation_id {
                    tracing::debug!("conversation changed since the failure, skipping retry");
                    return false;
                }
                self.load_messages().await.is_ok()
            }
            FailedOperation::LoadConversations => self.reload_conversations().await.is_ok(),
            FailedOperation::LoadModels => self.load_models().await.is_ok(),
        }
    }

    fn raise(&mut self, error: ChatError, retry: Option<FailedOperation>) {
        tracing::warn!(kind = ?error.kind, error = %error, "chat operation failed");
        self.error = Some(ErrorSlot {
            error: error.clone(),
            retry,
        });
        self.emit(ChatEvent::ErrorRaised(error));
    }

    fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.emit(ChatEvent::ErrorCleared);
        }
    }

    fn allocate_message_id(&mut self) -> MessageId {
        let id = MessageId::Provisional(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }
}

/// Issues `request`, bounded by `timeout` when one is configured.
async fn guarded_request(
    backend: &dyn Backend,
    request: ProcessMessageRequest,
    timeout: Option<std::time::Duration>,
) -> Result<ProcessReply, ChatError> {
    let pending = backend.process_message(request);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, pending).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ChatError::new(ErrorKind::Send, "The response timed out")
                    .with_details(format!("no reply within {}s", limit.as_secs())));
            }
        },
        None => pending.await,
    };

    result.map_err(|error| ChatError::from_bridge(ErrorKind::Send, SEND_FAILED, &error))
}

/// Final text for the target at `index`. A single reply belongs to the first
/// target only.
fn reply_text<'a>(reply: &'a ProcessReply, index: usize, model_id: &str) -> Option<&'a str> {
    match reply {
        ProcessReply::Single { reply } => (index == 0).then_some(reply.as_str()),
        ProcessReply::Multi { .. } => reply.reply_for(model_id),
    }
}
