use murmur_bridge::{ConversationId, ConversationSummary};

use crate::message::{Message, MessageId, Role};

/// Ordered messages of the active conversation.
///
/// Content mutations address messages by id so a reload or append that lands
/// while a stream is in flight cannot redirect chunks to the wrong row.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replaces the content of `id`. Returns false when no such message exists.
    pub fn update_content(&mut self, id: &MessageId, content: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn append_content(&mut self, id: &MessageId, chunk: &str) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.content.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Overwrites the last message's content; a no-op on an empty list.
    pub fn update_last_message(&mut self, content: impl Into<String>) -> bool {
        match self.messages.last_mut() {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    pub fn append_to_last(&mut self, chunk: &str) -> bool {
        match self.messages.last_mut() {
            Some(message) => {
                message.content.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Adds one thumbs-up. Returns the new count.
    pub fn react(&mut self, id: &MessageId) -> Option<u32> {
        let message = self.get_mut(id)?;
        message.reactions.thumbs_up = message.reactions.thumbs_up.saturating_add(1);
        Some(message.reactions.thumbs_up)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    /// Assistant messages after the most recent user message, oldest first.
    pub fn latest_turn_replies(&self) -> impl Iterator<Item = &Message> {
        let turn_start = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)
            .map_or(0, |index| index + 1);
        self.messages[turn_start..]
            .iter()
            .filter(|message| message.is_assistant())
    }

    pub fn set_model(&mut self, id: &MessageId, model: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(message) => {
                message.model = Some(model.into());
                true
            }
            None => false,
        }
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| &message.id == id)
    }
}

/// Conversation summaries as last reported by the backend, plus the active
/// selection. `None` means a fresh chat that has not been filed yet.
#[derive(Debug, Clone, Default)]
pub struct ConversationRegistry {
    summaries: Vec<ConversationSummary>,
    active: Option<ConversationId>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|summary| summary.id == id)
    }

    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        self.summaries = summaries;
    }

    pub fn remove(&mut self, id: ConversationId) -> Option<ConversationSummary> {
        let index = self.summaries.iter().position(|summary| summary.id == id)?;
        Some(self.summaries.remove(index))
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn set_active(&mut self, id: Option<ConversationId>) {
        self.active = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64, role: Role, content: &str) -> Message {
        Message::new(MessageId::Provisional(id), role, content, "10:00:00")
    }

    #[test]
    fn last_message_operations_are_noops_on_empty_list() {
        let mut store = MessageStore::new();
        assert!(!store.update_last_message("x"));
        assert!(!store.append_to_last("x"));
        assert!(store.is_empty());
    }

    #[test]
    fn content_patches_are_keyed_by_id() {
        let mut store = MessageStore::new();
        store.append(message(1, Role::User, "Hi"));
        store.append(message(2, Role::Assistant, ""));
        store.append(message(3, Role::Assistant, ""));

        assert!(store.append_content(&MessageId::Provisional(2), "Hel"));
        assert!(store.append_content(&MessageId::Provisional(3), "X"));
        assert!(store.append_content(&MessageId::Provisional(2), "lo"));
        assert!(!store.append_content(&MessageId::Provisional(9), "lost"));

        assert_eq!(store.messages()[1].content, "Hello");
        assert_eq!(store.messages()[2].content, "X");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn replace_all_never_merges() {
        let mut store = MessageStore::new();
        store.append(message(1, Role::User, "old"));
        store.replace_all(vec![message(5, Role::User, "new")]);

        assert_eq!(store.len(), 1);
        assert!(!store.contains(&MessageId::Provisional(1)));
    }

    #[test]
    fn reactions_only_increase() {
        let mut store = MessageStore::new();
        store.append(message(1, Role::Assistant, "answer"));

        assert_eq!(store.react(&MessageId::Provisional(1)), Some(1));
        assert_eq!(store.react(&MessageId::Provisional(1)), Some(2));
        assert_eq!(store.react(&MessageId::Provisional(2)), None);
    }

    #[test]
    fn last_assistant_scans_from_the_end() {
        let mut store = MessageStore::new();
        store.append(message(1, Role::Assistant, "first"));
        store.append(message(2, Role::User, "question"));
        assert_eq!(
            store.last_assistant().map(|message| message.content.as_str()),
            Some("first")
        );

        store.append(message(3, Role::Assistant, "second"));
        assert_eq!(
            store.last_assistant().map(|message| message.id.clone()),
            Some(MessageId::Provisional(3))
        );
    }

    #[test]
    fn latest_turn_stops_at_the_last_user_message() {
        let mut store = MessageStore::new();
        store.append(message(1, Role::User, "first"));
        store.append(message(2, Role::Assistant, "answer"));
        store.append(message(3, Role::User, "second"));
        assert_eq!(store.latest_turn_replies().count(), 0);

        store.append(message(4, Role::Assistant, "A"));
        store.append(message(5, Role::Assistant, "B"));
        assert_eq!(
            store
                .latest_turn_replies()
                .map(|message| message.id.clone())
                .collect::<Vec<_>>(),
            vec![MessageId::Provisional(4), MessageId::Provisional(5)]
        );
    }

    #[test]
    fn registry_tracks_active_selection() {
        let mut registry = ConversationRegistry::new();
        registry.replace_all(vec![ConversationSummary {
            id: ConversationId::new(4),
            title: "Rust".to_string(),
            preview: String::new(),
            model: "m1".to_string(),
            message_count: 2,
            timestamp: String::new(),
        }]);
        registry.set_active(Some(ConversationId::new(4)));

        assert!(registry.get(ConversationId::new(4)).is_some());
        assert!(registry.remove(ConversationId::new(4)).is_some());
        assert!(registry.remove(ConversationId::new(4)).is_none());
        assert_eq!(registry.active(), Some(ConversationId::new(4)));
    }
}
