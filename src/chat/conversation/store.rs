//! Local conversation store
//!
//! The single writable source of conversation and message state on the
//! client. Readers get an immutable `StoreSnapshot`; every mutation writes the
//! whole affected record to the durable backend first and then publishes a new
//! snapshot, so a reader sees either the old or the new record, never a mix.
//! Writers are serialized by an async gate.

use crate::chat::conversation::dao::ConversationBackend;
use crate::chat::conversation::models::{ConversationRecord, OptimisticSlot};
use crate::chat::conversation::types::ConversationDelta;
use crate::chat::error::{StoreError, StoreResult};
use crate::chat::projection::{self, ConversationListItem, MessageView};
use crate::chat::types::{Conversation, ConversationPatch, Message};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    order: Vec<String>,
    records: HashMap<String, Arc<ConversationRecord>>,
    active_id: Option<String>,
    optimistic: OptimisticSlot,
}

impl StoreSnapshot {
    /// Records in list order.
    pub fn records(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).map(Arc::as_ref))
    }

    pub fn record(&self, conversation_id: &str) -> Option<&ConversationRecord> {
        self.records.get(conversation_id).map(Arc::as_ref)
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.record(conversation_id).map(|r| &r.conversation)
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.record(conversation_id)
            .map(|r| r.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn optimistic(&self) -> &OptimisticSlot {
        &self.optimistic
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn put_record(&mut self, record: ConversationRecord) {
        let id = record.id().to_string();
        if !self.records.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.records.insert(id, Arc::new(record));
    }

    fn remove_record(&mut self, conversation_id: &str) -> bool {
        let removed = self.records.remove(conversation_id).is_some();
        if removed {
            self.order.retain(|id| id != conversation_id);
            if self.active_id.as_deref() == Some(conversation_id) {
                self.active_id = None;
            }
        }
        removed
    }
}

/// Inserts by creation time (after equal timestamps), or replaces in place
/// when the id is already present.
fn upsert_message(messages: &mut Vec<Message>, message: Message) {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
        *existing = message;
        return;
    }
    let pos = messages.partition_point(|m| m.created_at <= message.created_at);
    messages.insert(pos, message);
}

/// Deduplicates by id (later entries win) and orders by creation time.
fn normalize_messages(conversation_id: &str, messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for mut message in messages {
        message.conversation_id = Some(conversation_id.to_string());
        match out.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => out.push(message),
        }
    }
    out.sort_by_key(|m| m.created_at);
    out
}

fn touch(record: &mut ConversationRecord, at: i64) {
    if at > record.conversation.updated_at {
        record.conversation.updated_at = at;
    }
}

/// What `apply_delta` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub metadata_updated: bool,
    pub messages_applied: usize,
    pub written: bool,
}

pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
    snapshot: RwLock<Arc<StoreSnapshot>>,
    write_gate: tokio::sync::Mutex<()>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn ConversationBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(StoreSnapshot::default())),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates the store and hydrates it from the backend.
    pub async fn open(backend: Arc<dyn ConversationBackend>) -> StoreResult<Self> {
        let store = Self::new(backend);
        store.load().await?;
        Ok(store)
    }

    /// Replaces the in-memory records with what the backend holds. The active
    /// pointer survives only if its conversation still exists.
    pub async fn load(&self) -> StoreResult<usize> {
        let _gate = self.write_gate.lock().await;
        let records = self.backend.get_all().await?;
        let count = records.len();
        self.mutate(|s| {
            s.order.clear();
            s.records.clear();
            for record in records {
                s.put_record(record);
            }
            if let Some(active) = s.active_id.clone() {
                if !s.records.contains_key(&active) {
                    s.active_id = None;
                }
            }
        });
        info!("[ConvStore] loaded {} conversations", count);
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.read().clone()
    }

    /// Applies `f` to a copy of the latest snapshot and publishes it.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreSnapshot) -> R) -> R {
        let mut guard = self.snapshot.write();
        let mut next = StoreSnapshot::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Durable write, then publish. Callers hold the write gate.
    async fn commit(&self, record: ConversationRecord) -> StoreResult<()> {
        self.backend.put(&record).await?;
        self.mutate(|s| s.put_record(record));
        Ok(())
    }

    fn record_or_placeholder(snapshot: &StoreSnapshot, conversation_id: &str) -> ConversationRecord {
        snapshot
            .record(conversation_id)
            .cloned()
            .unwrap_or_else(|| ConversationRecord::new(Conversation::placeholder(conversation_id)))
    }

    // ========== conversations ==========

    /// Insert or replace by id. Existing entries keep their list position.
    pub async fn upsert_conversation(&self, conversation: Conversation) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let record = match current.record(&conversation.id) {
            Some(existing) if existing.conversation == conversation => {
                debug!("[ConvStore] conversation {} unchanged", conversation.id);
                return Ok(());
            }
            Some(existing) => ConversationRecord {
                conversation,
                ..existing.clone()
            },
            None => ConversationRecord::new(conversation),
        };
        debug!("[ConvStore] upsert conversation {}", record.id());
        self.commit(record).await
    }

    /// Shallow merge. Returns `false` (and writes nothing) if `id` is unknown.
    pub async fn update_conversation(
        &self,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> StoreResult<bool> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let Some(existing) = current.record(conversation_id) else {
            debug!("[ConvStore] update of unknown conversation {} ignored", conversation_id);
            return Ok(false);
        };
        let mut record = existing.clone();
        patch.apply(&mut record.conversation);
        self.commit(record).await?;
        Ok(true)
    }

    /// Replaces the whole message sequence (e.g. after a full remote fetch).
    pub async fn set_messages_for_conversation(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> StoreResult<()> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut record = Self::record_or_placeholder(&current, conversation_id);
        record.messages = normalize_messages(conversation_id, messages);
        if let Some(last) = record.messages.last().map(|m| m.created_at) {
            touch(&mut record, last);
        }
        debug!(
            "[ConvStore] replaced messages of {} ({} messages)",
            conversation_id,
            record.messages.len()
        );
        self.commit(record).await
    }

    /// Insert or replace by message id within the message's own conversation.
    pub async fn add_or_update_message(&self, message: Message) -> StoreResult<()> {
        let Some(conversation_id) = message.conversation_id.clone() else {
            return Err(StoreError::UnassignedMessage {
                message_id: message.id,
            });
        };
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut record = Self::record_or_placeholder(&current, &conversation_id);
        touch(&mut record, message.created_at);
        upsert_message(&mut record.messages, message);
        self.commit(record).await
    }

    /// Deletes a conversation and its messages; clears the active pointer if
    /// it pointed there.
    pub async fn remove_conversation(&self, conversation_id: &str) -> StoreResult<bool> {
        let _gate = self.write_gate.lock().await;
        if self.snapshot().record(conversation_id).is_none() {
            return Ok(false);
        }
        self.backend.delete(conversation_id).await?;
        self.mutate(|s| s.remove_record(conversation_id));
        info!("[ConvStore] removed conversation {}", conversation_id);
        Ok(true)
    }

    pub async fn set_sync_cursor(
        &self,
        conversation_id: &str,
        cursor: Option<String>,
    ) -> StoreResult<bool> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let Some(existing) = current.record(conversation_id) else {
            return Ok(false);
        };
        if existing.sync_cursor == cursor {
            return Ok(true);
        }
        let mut record = existing.clone();
        record.sync_cursor = cursor;
        self.commit(record).await?;
        Ok(true)
    }

    /// Applies a remote delta as a single record write: metadata is replaced
    /// (last writer wins), messages are replaced on a full delta and upserted
    /// otherwise, and the cursor is advanced.
    pub async fn apply_delta(
        &self,
        conversation_id: &str,
        delta: ConversationDelta,
    ) -> StoreResult<DeltaStats> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let existing = current.record(conversation_id);
        let mut record = Self::record_or_placeholder(&current, conversation_id);
        let mut stats = DeltaStats::default();

        if let Some(mut conversation) = delta.conversation {
            conversation.id = conversation_id.to_string();
            stats.metadata_updated = record.conversation != conversation;
            record.conversation = conversation;
        }

        stats.messages_applied = delta.messages.len();
        if delta.full {
            record.messages = normalize_messages(conversation_id, delta.messages);
        } else {
            for mut message in delta.messages {
                message.conversation_id = Some(conversation_id.to_string());
                touch(&mut record, message.created_at);
                upsert_message(&mut record.messages, message);
            }
        }

        if delta.cursor.is_some() {
            record.sync_cursor = delta.cursor;
        }

        if existing == Some(&record) {
            debug!("[ConvStore] delta for {} changed nothing", conversation_id);
            return Ok(stats);
        }
        self.commit(record).await?;
        stats.written = true;
        Ok(stats)
    }

    // ========== active pointer ==========

    /// Points the UI at a stored conversation, or at "new chat" with `None`.
    /// Returns `false` for an unknown id.
    pub fn set_active(&self, conversation_id: Option<String>) -> bool {
        self.mutate(|s| match conversation_id {
            Some(id) if !s.records.contains_key(&id) => {
                warn!("[ConvStore] cannot activate unknown conversation {}", id);
                false
            }
            other => {
                s.active_id = other;
                true
            }
        })
    }

    pub fn active_id(&self) -> Option<String> {
        self.snapshot().active_id.clone()
    }

    // ========== optimistic slot ==========

    /// Records a message the user just sent. Without an active conversation it
    /// goes into the optimistic slot; otherwise straight into the sequence.
    pub async fn stage_optimistic_message(&self, mut message: Message) -> StoreResult<()> {
        match message.conversation_id.clone().or_else(|| self.active_id()) {
            Some(conversation_id) => {
                message.conversation_id = Some(conversation_id);
                self.add_or_update_message(message).await
            }
            None => {
                debug!("[ConvStore] optimistic message {} staged", message.id);
                self.mutate(|s| s.optimistic = OptimisticSlot::Pending(message));
                Ok(())
            }
        }
    }

    /// Puts an id-less message back into the optimistic slot, for example after
    /// its send failed. Unlike `stage_optimistic_message` the active pointer is
    /// never consulted: the user may have opened another conversation since.
    pub fn restage_optimistic(&self, mut message: Message) {
        message.conversation_id = None;
        debug!(
            "[ConvStore] optimistic message {} restaged ({:?})",
            message.id, message.status
        );
        self.mutate(|s| s.optimistic = OptimisticSlot::Pending(message));
    }

    /// Marks the pending optimistic message as belonging to `conversation_id`,
    /// hiding it from projections. Returns `false` if nothing was pending.
    pub fn claim_optimistic(&self, conversation_id: &str) -> bool {
        self.mutate(|s| match std::mem::take(&mut s.optimistic) {
            OptimisticSlot::Pending(mut message) => {
                message.conversation_id = Some(conversation_id.to_string());
                s.optimistic = OptimisticSlot::Adopted {
                    conversation_id: conversation_id.to_string(),
                    message,
                };
                true
            }
            other => {
                s.optimistic = other;
                false
            }
        })
    }

    /// Moves the optimistic message into `conversation_id`'s sequence and
    /// empties the slot in the same published snapshot. The conversation
    /// becomes active if none is.
    pub async fn adopt_optimistic(&self, conversation_id: &str) -> StoreResult<Option<Message>> {
        let _gate = self.write_gate.lock().await;
        let current = self.snapshot();
        let mut message = match current.optimistic() {
            OptimisticSlot::Empty => return Ok(None),
            OptimisticSlot::Pending(message) => message.clone(),
            OptimisticSlot::Adopted {
                conversation_id: claimed,
                message,
            } => {
                if claimed != conversation_id {
                    warn!(
                        "[ConvStore] optimistic message claimed by {}, not {}",
                        claimed, conversation_id
                    );
                    return Ok(None);
                }
                message.clone()
            }
        };
        message.conversation_id = Some(conversation_id.to_string());

        let mut record = Self::record_or_placeholder(&current, conversation_id);
        touch(&mut record, message.created_at);
        upsert_message(&mut record.messages, message.clone());
        self.backend.put(&record).await?;

        let message_id = message.id.clone();
        self.mutate(|s| {
            s.put_record(record);
            if s.optimistic.message().map(|m| &m.id) == Some(&message_id) {
                s.optimistic = OptimisticSlot::Empty;
            }
            if s.active_id.is_none() {
                s.active_id = Some(conversation_id.to_string());
            }
        });
        info!(
            "[ConvStore] optimistic message {} adopted by {}",
            message_id, conversation_id
        );
        Ok(Some(message))
    }

    pub fn clear_optimistic(&self) {
        self.mutate(|s| s.optimistic = OptimisticSlot::Empty);
    }

    pub fn optimistic_slot(&self) -> OptimisticSlot {
        self.snapshot().optimistic.clone()
    }

    // ========== reads ==========

    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.snapshot().conversation(conversation_id).cloned()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.snapshot().messages(conversation_id).to_vec()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        self.snapshot().order.clone()
    }

    pub fn sync_cursor(&self, conversation_id: &str) -> Option<String> {
        self.snapshot()
            .record(conversation_id)
            .and_then(|r| r.sync_cursor.clone())
    }

    pub fn project_conversation_list(&self) -> Vec<ConversationListItem> {
        projection::project_conversation_list(&self.snapshot())
    }

    pub fn project_active_conversation_messages(&self) -> Vec<MessageView> {
        projection::project_active_conversation_messages(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::conversation::memory::InMemoryConversationBackend;
    use crate::chat::types::{MessageStatus, Role};

    fn store_with_backend() -> (ConversationStore, Arc<InMemoryConversationBackend>) {
        let backend = Arc::new(InMemoryConversationBackend::new());
        (ConversationStore::new(backend.clone()), backend)
    }

    fn message(id: &str, conversation_id: &str, content: &str, created_at: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: Some(conversation_id.to_string()),
            role: Role::User,
            content: content.to_string(),
            status: MessageStatus::Sent,
            created_at,
            attachments: Vec::new(),
            payloads: Vec::new(),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_position_and_appends_new() {
        let (store, _) = store_with_backend();
        for id in ["a", "b", "c"] {
            store
                .upsert_conversation(Conversation::new(id, id))
                .await
                .unwrap();
        }
        let mut renamed = store.conversation("a").unwrap();
        renamed.title = "renamed".to_string();
        store.upsert_conversation(renamed).await.unwrap();
        store
            .upsert_conversation(Conversation::new("d", "d"))
            .await
            .unwrap();

        assert_eq!(store.conversation_ids(), vec!["a", "b", "c", "d"]);
        assert_eq!(store.conversation("a").unwrap().title, "renamed");
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (store, backend) = store_with_backend();
        let conv = Conversation::new("c-1", "same");
        store.upsert_conversation(conv.clone()).await.unwrap();
        store
            .add_or_update_message(message("m1", "c-1", "hi", 1))
            .await
            .unwrap();
        let before = store.snapshot();
        let writes = backend.write_count();

        let conv = store.conversation("c-1").unwrap();
        store.upsert_conversation(conv.clone()).await.unwrap();
        store.upsert_conversation(conv).await.unwrap();

        let after = store.snapshot();
        assert_eq!(backend.write_count(), writes);
        assert_eq!(after.order, before.order);
        assert_eq!(after.record("c-1"), before.record("c-1"));
    }

    #[tokio::test]
    async fn upsert_keeps_messages_and_cursor() {
        let (store, _) = store_with_backend();
        store
            .add_or_update_message(message("m1", "c-1", "hi", 1))
            .await
            .unwrap();
        store
            .set_sync_cursor("c-1", Some("v1".to_string()))
            .await
            .unwrap();

        store
            .upsert_conversation(Conversation::new("c-1", "titled"))
            .await
            .unwrap();
        assert_eq!(store.messages("c-1").len(), 1);
        assert_eq!(store.sync_cursor("c-1").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn update_conversation_merges_or_noops() {
        let (store, backend) = store_with_backend();
        assert!(!store
            .update_conversation("nope", &ConversationPatch::default())
            .await
            .unwrap());
        assert_eq!(backend.write_count(), 0);

        let mut conv = Conversation::new("c-1", "title");
        conv.description = "desc".to_string();
        store.upsert_conversation(conv).await.unwrap();
        let patch = ConversationPatch {
            is_starred: Some(true),
            ..Default::default()
        };
        assert!(store.update_conversation("c-1", &patch).await.unwrap());

        let conv = store.conversation("c-1").unwrap();
        assert!(conv.is_starred);
        assert_eq!(conv.title, "title");
        assert_eq!(conv.description, "desc");
    }

    #[tokio::test]
    async fn message_round_trip_is_exact() {
        let (store, _) = store_with_backend();
        let mut msg = message("m1", "c-1", "héllo \u{1F600}\nline two  ", 7);
        msg.status = MessageStatus::Error;
        store.add_or_update_message(msg.clone()).await.unwrap();

        let stored = store.messages("c-1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content.as_bytes(), msg.content.as_bytes());
        assert_eq!(stored[0].status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn add_or_update_replaces_in_place_and_orders_by_time() {
        let (store, _) = store_with_backend();
        store
            .add_or_update_message(message("m1", "c-1", "first", 10))
            .await
            .unwrap();
        store
            .add_or_update_message(message("m3", "c-1", "third", 30))
            .await
            .unwrap();
        store
            .add_or_update_message(message("m2", "c-1", "second", 20))
            .await
            .unwrap();
        store
            .add_or_update_message(message("m1", "c-1", "first (edited)", 10))
            .await
            .unwrap();

        let contents: Vec<_> = store
            .messages("c-1")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first (edited)", "second", "third"]);
        assert!(store.conversation("c-1").unwrap().updated_at >= 30);
    }

    #[tokio::test]
    async fn unassigned_message_is_rejected() {
        let (store, _) = store_with_backend();
        let err = store
            .add_or_update_message(Message::user(None, "orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnassignedMessage { .. }));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn set_messages_dedupes_and_sorts() {
        let (store, _) = store_with_backend();
        store
            .add_or_update_message(message("old", "c-1", "gone", 1))
            .await
            .unwrap();
        store
            .set_messages_for_conversation(
                "c-1",
                vec![
                    message("b", "c-1", "b", 20),
                    message("a", "c-1", "a-v1", 10),
                    message("a", "c-1", "a-v2", 10),
                ],
            )
            .await
            .unwrap();

        let contents: Vec<_> = store
            .messages("c-1")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["a-v2", "b"]);
    }

    #[tokio::test]
    async fn remove_clears_active_pointer() {
        let (store, _) = store_with_backend();
        store
            .upsert_conversation(Conversation::new("c-1", "x"))
            .await
            .unwrap();
        assert!(store.set_active(Some("c-1".to_string())));
        assert!(!store.set_active(Some("unknown".to_string())));
        assert_eq!(store.active_id().as_deref(), Some("c-1"));

        assert!(store.remove_conversation("c-1").await.unwrap());
        assert_eq!(store.active_id(), None);
        assert!(store.messages("c-1").is_empty());
        assert!(!store.remove_conversation("c-1").await.unwrap());
    }

    #[tokio::test]
    async fn storage_failure_propagates_and_leaves_view_unchanged() {
        let (store, backend) = store_with_backend();
        store
            .add_or_update_message(message("m1", "c-1", "kept", 1))
            .await
            .unwrap();
        backend.set_fail_writes(true);

        let err = store
            .add_or_update_message(message("m2", "c-1", "lost?", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert_eq!(store.messages("c-1").len(), 1);

        assert!(store.remove_conversation("c-1").await.is_err());
        assert!(store.conversation("c-1").is_some());
    }

    #[tokio::test]
    async fn load_restores_backend_order() {
        let records = vec![
            ConversationRecord::new(Conversation::new("z", "z")),
            ConversationRecord::new(Conversation::new("a", "a")),
        ];
        let backend = Arc::new(InMemoryConversationBackend::with_records(records));
        let store = ConversationStore::open(backend).await.unwrap();
        assert_eq!(store.conversation_ids(), vec!["z", "a"]);
    }

    #[tokio::test]
    async fn staged_message_goes_to_active_conversation() {
        let (store, _) = store_with_backend();
        store
            .upsert_conversation(Conversation::new("c-1", "x"))
            .await
            .unwrap();
        store.set_active(Some("c-1".to_string()));

        store
            .stage_optimistic_message(Message::user(None, "direct"))
            .await
            .unwrap();
        assert!(store.optimistic_slot().is_empty());
        assert_eq!(store.messages("c-1")[0].content, "direct");
    }

    #[tokio::test]
    async fn restage_ignores_active_conversation() {
        let (store, backend) = store_with_backend();
        store
            .upsert_conversation(Conversation::new("other", "x"))
            .await
            .unwrap();
        store.set_active(Some("other".to_string()));

        let mut msg = Message::user(None, "for a new chat");
        msg.status = MessageStatus::Error;
        store.restage_optimistic(msg.clone());

        assert!(store.messages("other").is_empty());
        assert!(backend.get("other").await.unwrap().unwrap().messages.is_empty());
        match store.optimistic_slot() {
            OptimisticSlot::Pending(m) => {
                assert_eq!(m.id, msg.id);
                assert_eq!(m.status, MessageStatus::Error);
            }
            other => panic!("unexpected slot {other:?}"),
        }
    }

    #[tokio::test]
    async fn adopt_moves_message_and_empties_slot() {
        let (store, _) = store_with_backend();
        let msg = Message::user(None, "hello");
        store.stage_optimistic_message(msg.clone()).await.unwrap();
        assert!(matches!(store.optimistic_slot(), OptimisticSlot::Pending(_)));

        assert!(store.claim_optimistic("c-42"));
        assert!(matches!(
            store.optimistic_slot(),
            OptimisticSlot::Adopted { .. }
        ));

        let adopted = store.adopt_optimistic("c-42").await.unwrap().unwrap();
        assert_eq!(adopted.id, msg.id);
        assert!(store.optimistic_slot().is_empty());
        assert_eq!(store.active_id().as_deref(), Some("c-42"));
        let stored = store.messages("c-42");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].conversation_id.as_deref(), Some("c-42"));

        // nothing left to adopt
        assert!(store.adopt_optimistic("c-42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adopt_refuses_other_claimant() {
        let (store, _) = store_with_backend();
        store
            .stage_optimistic_message(Message::user(None, "hello"))
            .await
            .unwrap();
        store.claim_optimistic("c-1");
        assert!(store.adopt_optimistic("c-2").await.unwrap().is_none());
        assert!(!store.optimistic_slot().is_empty());
    }

    #[tokio::test]
    async fn apply_delta_merges_and_advances_cursor() {
        let (store, backend) = store_with_backend();
        store
            .add_or_update_message(message("local", "c-1", "mine", 5))
            .await
            .unwrap();

        let mut remote = Conversation::new("c-1", "from server");
        remote.updated_at = 100;
        let stats = store
            .apply_delta(
                "c-1",
                ConversationDelta {
                    conversation: Some(remote),
                    messages: vec![message("r1", "c-1", "theirs", 50)],
                    cursor: Some("v2".to_string()),
                    full: false,
                },
            )
            .await
            .unwrap();
        assert!(stats.metadata_updated);
        assert!(stats.written);
        assert_eq!(store.messages("c-1").len(), 2);
        assert_eq!(store.sync_cursor("c-1").as_deref(), Some("v2"));
        assert_eq!(store.conversation("c-1").unwrap().title, "from server");

        let writes = backend.write_count();
        let stats = store
            .apply_delta("c-1", ConversationDelta::default())
            .await
            .unwrap();
        assert!(!stats.written);
        assert_eq!(backend.write_count(), writes);
    }

    #[tokio::test]
    async fn full_delta_replaces_sequence() {
        let (store, _) = store_with_backend();
        store
            .add_or_update_message(message("stale", "c-1", "stale", 5))
            .await
            .unwrap();
        store
            .apply_delta(
                "c-1",
                ConversationDelta {
                    messages: vec![message("fresh", "c-1", "fresh", 6)],
                    full: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = store.messages("c-1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["fresh"]);
    }
}
