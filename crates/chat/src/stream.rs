use std::collections::HashMap;

use murmur_bridge::{ModelDescriptor, StreamChunk};

use crate::message::MessageId;

/// Payload shape expected on the stream subscription for one request.
///
/// Resolved once from the number of target models; payloads are decoded
/// against it instead of being inspected per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMode {
    /// Plain string chunks, all belonging to `model_id`.
    Single { model_id: String },
    /// `{ modelId, chunk }` objects.
    Multi,
}

impl StreamMode {
    pub fn for_targets(targets: &[ModelDescriptor]) -> Self {
        match targets {
            [only] => Self::Single {
                model_id: only.id.clone(),
            },
            _ => Self::Multi,
        }
    }
}

/// One decoded chunk and the message it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedChunk {
    pub model_id: String,
    pub message_id: MessageId,
    pub chunk: String,
}

/// Maps model ids to their placeholder messages for one in-flight request.
#[derive(Debug, Clone)]
pub struct StreamRouter {
    mode: StreamMode,
    placeholders: HashMap<String, MessageId>,
}

impl StreamRouter {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            placeholders: HashMap::new(),
        }
    }

    pub fn bind(&mut self, model_id: impl Into<String>, message_id: MessageId) {
        self.placeholders.insert(model_id.into(), message_id);
    }

    pub fn placeholder(&self, model_id: &str) -> Option<&MessageId> {
        self.placeholders.get(model_id)
    }

    /// Decodes `payload` for the current mode. Payloads of the wrong shape and
    /// chunks for models without a placeholder are dropped.
    pub fn route(&self, payload: serde_json::Value) -> Option<RoutedChunk> {
        let (model_id, chunk) = match &self.mode {
            StreamMode::Single { model_id } => match payload {
                serde_json::Value::String(chunk) => (model_id.clone(), chunk),
                other => {
                    tracing::warn!(payload = %other, "dropping non-string chunk in single-model stream");
                    return None;
                }
            },
            StreamMode::Multi => match StreamChunk::from_payload(payload) {
                Ok(StreamChunk { model_id, chunk }) => (model_id, chunk),
                Err(error) => {
                    tracing::warn!(error = %error, "dropping malformed multi-model chunk");
                    return None;
                }
            },
        };

        let Some(message_id) = self.placeholders.get(&model_id) else {
            tracing::warn!(model_id = %model_id, "dropping chunk for model without placeholder");
            return None;
        };

        Some(RoutedChunk {
            model_id,
            message_id: message_id.clone(),
            chunk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_router() -> StreamRouter {
        let mut router = StreamRouter::new(StreamMode::Multi);
        router.bind("m1", MessageId::Provisional(1));
        router.bind("m2", MessageId::Provisional(2));
        router
    }

    #[test]
    fn mode_follows_target_count() {
        let one = [ModelDescriptor::new("m1", "openai")];
        let two = [
            ModelDescriptor::new("m1", "openai"),
            ModelDescriptor::new("m2", "openai"),
        ];
        assert_eq!(
            StreamMode::for_targets(&one),
            StreamMode::Single {
                model_id: "m1".to_string()
            }
        );
        assert_eq!(StreamMode::for_targets(&two), StreamMode::Multi);
    }

    #[test]
    fn single_mode_routes_plain_strings_only() {
        let mut router = StreamRouter::new(StreamMode::Single {
            model_id: "m1".to_string(),
        });
        router.bind("m1", MessageId::Provisional(4));

        let routed = router.route(serde_json::json!("Hel")).unwrap();
        assert_eq!(routed.message_id, MessageId::Provisional(4));
        assert_eq!(routed.chunk, "Hel");

        assert!(
            router
                .route(StreamChunk::new("m1", "A").into_payload())
                .is_none()
        );
    }

    #[test]
    fn multi_mode_demultiplexes_by_model_id() {
        let router = multi_router();

        let routed = router
            .route(StreamChunk::new("m2", "X").into_payload())
            .unwrap();
        assert_eq!(routed.message_id, MessageId::Provisional(2));
        assert_eq!(routed.model_id, "m2");

        assert!(router.route(serde_json::json!("bare")).is_none());
        assert!(
            router
                .route(StreamChunk::new("m9", "lost").into_payload())
                .is_none()
        );
    }
}
