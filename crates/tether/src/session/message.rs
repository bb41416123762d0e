//! Conversation history held for one session.

use chrono::{DateTime, Utc};
use tether_protocol::Role;

/// Local id of a message, unique for the lifetime of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery of a user turn. Assistant turns are always `Received`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Appended optimistically, post in flight.
    Pending,
    /// Server acknowledged the post.
    Sent,
    /// Post failed; can be retried.
    Failed(String),
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivery: DeliveryState,
}

#[derive(Debug, Default)]
pub struct History {
    messages: Vec<Message>,
    last_id: u64,
}

impl History {
    pub fn push_user(&mut self, content: String) -> MessageId {
        self.push(Role::User, content, Utc::now(), DeliveryState::Pending)
    }

    pub fn push_assistant(&mut self, content: String, received_at: DateTime<Utc>) -> MessageId {
        self.push(Role::Assistant, content, received_at, DeliveryState::Received)
    }

    fn push(
        &mut self,
        role: Role,
        content: String,
        timestamp: DateTime<Utc>,
        delivery: DeliveryState,
    ) -> MessageId {
        self.last_id += 1;
        let id = MessageId(self.last_id);
        self.messages.push(Message {
            id,
            role,
            content,
            timestamp,
            delivery,
        });
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Returns false if no message has this id.
    pub fn set_delivery(&mut self, id: MessageId, delivery: DeliveryState) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.delivery = delivery;
                true
            }
            None => false,
        }
    }

    /// Most recent user turn whose post failed.
    pub fn last_failed(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && matches!(m.delivery, DeliveryState::Failed(_)))
            .map(|m| m.id)
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

    /// Drop all messages. Ids keep counting up so stale ids never match.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_stay_unique_across_clear() {
        let mut history = History::default();
        let first = history.push_user("a".to_string());
        history.clear();
        let second = history.push_user("b".to_string());

        assert_ne!(first, second);
        assert!(history.get(first).is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_last_failed_finds_latest_failed_user_turn() {
        let mut history = History::default();
        let a = history.push_user("a".to_string());
        let b = history.push_user("b".to_string());
        history.push_assistant("reply".to_string(), Utc::now());
        assert_eq!(history.last_failed(), None);

        history.set_delivery(a, DeliveryState::Failed("502".to_string()));
        history.set_delivery(b, DeliveryState::Failed("502".to_string()));
        assert_eq!(history.last_failed(), Some(b));

        history.set_delivery(b, DeliveryState::Sent);
        assert_eq!(history.last_failed(), Some(a));
        assert!(!history.set_delivery(MessageId(99), DeliveryState::Sent));
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId(3).to_string(), "#3");
    }
}
