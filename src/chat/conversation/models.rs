//! Local conversation models

use crate::chat::types::{Conversation, Message};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Background sync settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSchedulerConfig {
    /// Triggers closer together than this are ignored.
    pub min_interval: Duration,
    /// Upper bound on conversations fetched per round.
    pub max_batch: usize,
    /// How many remote conversations to list per round.
    pub page_size: usize,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            max_batch: 20,
            page_size: 50,
        }
    }
}

/// One durable entry: metadata, the ordered message sequence and the sync
/// cursor returned by the last remote delta. Written as a whole, so readers
/// never see metadata and messages out of step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub sync_cursor: Option<String>,
}

impl ConversationRecord {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
            sync_cursor: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }
}

/// The message shown before a brand-new conversation has a server id.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OptimisticSlot {
    #[default]
    Empty,
    /// Waiting for a conversation id; visible while no conversation is active.
    Pending(Message),
    /// Claimed by a just-created conversation and about to be moved into its
    /// sequence. Never shown, so it cannot duplicate the stored copy.
    Adopted {
        conversation_id: String,
        message: Message,
    },
}

impl OptimisticSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, OptimisticSlot::Empty)
    }

    /// The message a projection may render, if any.
    pub fn visible_message(&self) -> Option<&Message> {
        match self {
            OptimisticSlot::Pending(message) if message.conversation_id.is_none() => Some(message),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            OptimisticSlot::Empty => None,
            OptimisticSlot::Pending(message) | OptimisticSlot::Adopted { message, .. } => {
                Some(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unclaimed_pending_message_is_visible() {
        let msg = Message::user(None, "hello");
        assert!(OptimisticSlot::Empty.visible_message().is_none());
        assert_eq!(
            OptimisticSlot::Pending(msg.clone()).visible_message(),
            Some(&msg)
        );

        let adopted = OptimisticSlot::Adopted {
            conversation_id: "c-42".to_string(),
            message: msg.clone(),
        };
        assert!(adopted.visible_message().is_none());
        assert_eq!(adopted.message(), Some(&msg));

        let claimed = Message::user(Some("c-42".to_string()), "hello");
        assert!(OptimisticSlot::Pending(claimed).visible_message().is_none());
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut record = ConversationRecord::new(Conversation::new("c-1", "title"));
        record.messages.push(Message::user(Some("c-1".to_string()), "hi"));
        record.sync_cursor = Some("v3".to_string());

        let json = serde_json::to_string(&record).unwrap();
        let back: ConversationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
