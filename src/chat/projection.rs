//! Read projections
//!
//! Pure functions from a `StoreSnapshot` to what the UI renders. They never
//! mutate anything and can be recomputed at any time.

use crate::chat::conversation::store::StoreSnapshot;
use crate::chat::types::{Message, MessageStatus, Role};
use serde::Serialize;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub is_starred: bool,
    pub is_unread: bool,
    pub is_system: bool,
    pub updated_at: i64,
    pub message_count: usize,
    pub last_message_preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub conversation_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: i64,
    pub attachment_count: usize,
    /// Shown from the optimistic slot, not from storage.
    pub is_optimistic: bool,
}

impl MessageView {
    fn from_message(message: &Message, is_optimistic: bool) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content.clone(),
            status: message.status,
            created_at: message.created_at,
            attachment_count: message.attachments.len(),
            is_optimistic,
        }
    }
}

fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default().trim();
    match line.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line.to_string(),
    }
}

/// Conversation list, starred first, then most recently updated.
pub fn project_conversation_list(snapshot: &StoreSnapshot) -> Vec<ConversationListItem> {
    let mut items: Vec<ConversationListItem> = snapshot
        .records()
        .map(|record| {
            let conv = &record.conversation;
            ConversationListItem {
                id: conv.id.clone(),
                title: conv.title.clone(),
                description: conv.description.clone(),
                is_starred: conv.is_starred,
                is_unread: conv.is_unread,
                is_system: conv.is_system,
                updated_at: conv.updated_at,
                message_count: record.messages.len(),
                last_message_preview: record.messages.last().map(|m| preview(&m.content)),
            }
        })
        .collect();

    // stable: equal keys keep store order
    items.sort_by(|a, b| {
        b.is_starred
            .cmp(&a.is_starred)
            .then(b.updated_at.cmp(&a.updated_at))
    });
    items
}

/// Messages of the active conversation. With no active conversation, only an
/// unclaimed optimistic message can appear.
pub fn project_active_conversation_messages(snapshot: &StoreSnapshot) -> Vec<MessageView> {
    match snapshot.active_id() {
        Some(active) => snapshot
            .messages(active)
            .iter()
            .map(|m| MessageView::from_message(m, false))
            .collect(),
        None => snapshot
            .optimistic()
            .visible_message()
            .map(|m| MessageView::from_message(m, true))
            .into_iter()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::conversation::memory::InMemoryConversationBackend;
    use crate::chat::conversation::store::ConversationStore;
    use crate::chat::types::{Conversation, ConversationPatch};
    use std::sync::Arc;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(InMemoryConversationBackend::new()))
    }

    #[tokio::test]
    async fn new_chat_shows_single_optimistic_message() {
        let store = store();
        store
            .stage_optimistic_message(Message::user(None, "hello"))
            .await
            .unwrap();

        let views = store.project_active_conversation_messages();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].content, "hello");
        assert!(views[0].is_optimistic);
        assert!(store.project_conversation_list().is_empty());

        store.claim_optimistic("c-42");
        assert!(store.project_active_conversation_messages().is_empty());

        store.adopt_optimistic("c-42").await.unwrap();
        let views = store.project_active_conversation_messages();
        assert_eq!(views.len(), 1);
        assert!(!views[0].is_optimistic);
        assert_eq!(views[0].conversation_id.as_deref(), Some("c-42"));

        let list = store.project_conversation_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message_count, 1);
        assert_eq!(list[0].last_message_preview.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn active_conversation_hides_optimistic_slot() {
        let store = store();
        store
            .stage_optimistic_message(Message::user(None, "draft"))
            .await
            .unwrap();
        store
            .upsert_conversation(Conversation::new("c-1", "other"))
            .await
            .unwrap();
        store.set_active(Some("c-1".to_string()));
        assert!(store.project_active_conversation_messages().is_empty());
    }

    #[tokio::test]
    async fn list_puts_starred_first_then_recent() {
        let store = store();
        for (id, at) in [("old", 1), ("new", 3), ("mid", 2)] {
            let mut conv = Conversation::new(id, id);
            conv.updated_at = at;
            store.upsert_conversation(conv).await.unwrap();
        }
        store
            .update_conversation(
                "old",
                &ConversationPatch {
                    is_starred: Some(true),
                    updated_at: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ids: Vec<_> = store
            .project_conversation_list()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["old", "new", "mid"]);
    }

    #[test]
    fn preview_uses_first_line_and_truncates() {
        assert_eq!(preview("  first\nsecond"), "first");
        let long = "é".repeat(PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }
}
