//! Conversation types and state management

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// A single chat message as shown to the student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    pub fn user(text: &str) -> Self {
        Self::new(Sender::User, text.to_string(), false)
    }

    /// Empty AI message that will be filled in by streamed snapshots
    pub fn placeholder() -> Self {
        Self::new(Sender::Ai, String::new(), true)
    }

    pub fn welcome(text: &str) -> Self {
        Self {
            id: "welcome".to_string(),
            ..Self::new(Sender::Ai, text.to_string(), false)
        }
    }

    fn new(sender: Sender, text: String, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            sender,
            timestamp: Utc::now().timestamp_millis(),
            is_streaming,
        }
    }
}

/// Ordered, append-only list of messages addressed by id
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Apply `f` to the message with the given id. Returns false if no such message exists.
    pub fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Message::user("a");
        let b = Message::user("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_placeholder_is_streaming_and_empty() {
        let msg = Message::placeholder();
        assert_eq!(msg.sender, Sender::Ai);
        assert!(msg.is_streaming);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn test_update_only_touches_target() {
        let mut store = MessageStore::new();
        let first = Message::user("first");
        let second = Message::placeholder();
        let first_id = first.id.clone();
        let second_id = second.id.clone();
        store.push(first);
        store.push(second);

        assert!(store.update(&second_id, |m| m.text = "hello".into()));
        assert_eq!(store.get(&second_id).unwrap().text, "hello");
        assert_eq!(store.get(&first_id).unwrap().text, "first");
        assert!(!store.update("missing", |m| m.text = "x".into()));
        assert_eq!(store.messages().len(), 2);
    }

    #[test]
    fn test_serializes_camel_case() {
        let msg = Message::welcome("Chào em!");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "welcome");
        assert_eq!(json["sender"], "ai");
        assert_eq!(json["isStreaming"], false);
    }
}
