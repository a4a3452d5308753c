use crate::chat::conversation::dao::ConversationBackend;
use crate::chat::conversation::models::ConversationRecord;
use crate::chat::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory backend for conversations.
/// Useful for testing and development; `fail_writes` simulates a full disk.
#[derive(Default)]
pub struct InMemoryConversationBackend {
    records: Mutex<Vec<ConversationRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryConversationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ConversationRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Makes every subsequent `put`/`delete` fail with `StoreError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "storage quota exceeded".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationBackend for InMemoryConversationBackend {
    async fn get_all(&self) -> StoreResult<Vec<ConversationRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.id() == conversation_id)
            .cloned())
    }

    async fn put(&self, record: &ConversationRecord) -> StoreResult<()> {
        self.check_writable()?;
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.records.lock().retain(|r| r.id() != conversation_id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::Conversation;

    #[tokio::test]
    async fn put_replaces_in_place() {
        let backend = InMemoryConversationBackend::new();
        backend
            .put(&ConversationRecord::new(Conversation::new("a", "1")))
            .await
            .unwrap();
        backend
            .put(&ConversationRecord::new(Conversation::new("b", "2")))
            .await
            .unwrap();
        backend
            .put(&ConversationRecord::new(Conversation::new("a", "3")))
            .await
            .unwrap();

        let all = backend.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].conversation.title, "3");
        assert_eq!(backend.write_count(), 3);
    }

    #[tokio::test]
    async fn failing_writes_surface_as_errors() {
        let backend = InMemoryConversationBackend::new();
        backend.set_fail_writes(true);
        let err = backend
            .put(&ConversationRecord::new(Conversation::new("a", "1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(backend.get_all().await.unwrap().is_empty());
    }
}
