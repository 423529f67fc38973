use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{BridgeResult, DecodeSnafu};

/// Event name the backend uses for incremental response content.
pub const STREAM_RESPONSE_EVENT: &str = "stream-response";

/// Durable conversation identifier assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl ConversationId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Per-provider backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default)]
    pub available_models: Vec<String>,
}

impl ProviderSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: String::new(),
            model: model.into(),
            max_tokens: default_max_tokens(),
            streaming: default_streaming(),
            available_models: Vec::new(),
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_available_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_models = models.into_iter().map(Into::into).collect();
        self
    }
}

/// Backend configuration as returned by `get_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub active_provider: String,
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl AppConfig {
    pub fn active_settings(&self) -> Option<&ProviderSettings> {
        self.providers.get(&self.active_provider)
    }

    /// Streaming flag of the active provider. A config whose active provider is
    /// missing is treated as non-streaming.
    pub fn streaming_enabled(&self) -> bool {
        self.active_settings()
            .is_some_and(|settings| settings.streaming)
    }

    pub fn active_model(&self) -> Option<ModelDescriptor> {
        self.active_settings().map(|settings| {
            ModelDescriptor::new(settings.model.clone(), self.active_provider.clone())
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "anthropic".to_string(),
            ProviderSettings::new("claude-3-sonnet-20240229").with_available_models([
                "claude-3-opus-20240229",
                "claude-3-sonnet-20240229",
                "claude-3-haiku-20240307",
                "claude-2.1",
            ]),
        );
        providers.insert(
            "openai".to_string(),
            ProviderSettings::new("gpt-4-turbo-preview").with_available_models([
                "gpt-4-turbo-preview",
                "gpt-4-0125-preview",
                "gpt-4",
                "gpt-3.5-turbo",
            ]),
        );
        providers.insert(
            "openrouter".to_string(),
            ProviderSettings::new("anthropic/claude-3-opus").with_available_models([
                "anthropic/claude-3-opus",
                "anthropic/claude-3-sonnet",
                "openai/gpt-4-turbo-preview",
                "google/gemini-pro",
                "meta/llama-3-70b",
            ]),
        );

        Self {
            active_provider: "anthropic".to_string(),
            providers,
        }
    }
}

/// Model reference sent along with a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMessageRequest {
    pub message: String,
    #[serde(
        rename = "selectedModels",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_models: Option<Vec<ModelDescriptor>>,
}

impl ProcessMessageRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            selected_models: None,
        }
    }

    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.selected_models = Some(models);
        self
    }

    /// Model ids the backend should answer with, in request order.
    pub fn target_ids(&self) -> Vec<&str> {
        self.selected_models
            .iter()
            .flatten()
            .map(|model| model.id.as_str())
            .collect()
    }
}

/// Final response of `process_message`; the shape depends on single- vs
/// multi-model mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessReply {
    Single { reply: String },
    Multi { replies: BTreeMap<String, String> },
}

impl ProcessReply {
    pub fn single(reply: impl Into<String>) -> Self {
        Self::Single {
            reply: reply.into(),
        }
    }

    /// Reply text addressed to `model_id`. A single reply answers for any model.
    pub fn reply_for(&self, model_id: &str) -> Option<&str> {
        match self {
            Self::Single { reply } => Some(reply.as_str()),
            Self::Multi { replies } => replies.get(model_id).map(String::as_str),
        }
    }
}

/// Multi-model stream payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub chunk: String,
}

impl StreamChunk {
    pub fn new(model_id: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            chunk: chunk.into(),
        }
    }

    pub fn into_payload(self) -> serde_json::Value {
        serde_json::json!({ "modelId": self.model_id, "chunk": self.chunk })
    }

    pub fn from_payload(payload: serde_json::Value) -> BridgeResult<Self> {
        serde_json::from_value(payload).context(DecodeSnafu {
            stage: "decode-stream-chunk",
            command: STREAM_RESPONSE_EVENT,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionCounts {
    #[serde(rename = "thumbsUp", default)]
    pub thumbs_up: u32,
}

/// Message row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub content: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactions: Option<ReactionCounts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub timestamp: String,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_streaming() -> bool {
    true
}
