//! Conversation data access layer
//!
//! The durable side of the local store is a key-value mapping from
//! conversation id to a serialized `ConversationRecord`. The SQLite
//! implementation keeps one row per conversation plus its list position.

use crate::chat::conversation::models::ConversationRecord;
use crate::chat::error::StoreResult;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

/// Durable key-value storage keyed by conversation id.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// All records, in the order they were first inserted.
    async fn get_all(&self) -> StoreResult<Vec<ConversationRecord>>;

    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationRecord>>;

    /// Insert or replace. A replaced record keeps its original position.
    async fn put(&self, record: &ConversationRecord) -> StoreResult<()>;

    async fn delete(&self, conversation_id: &str) -> StoreResult<()>;
}

/// Conversation DAO (sqlx / SQLite)
pub struct SqliteConversationDao {
    db: Pool<Sqlite>,
}

impl SqliteConversationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Creates the table if needed.
    pub async fn init_db(&self) -> StoreResult<()> {
        Self::init_db_with_connection(&self.db).await
    }

    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> StoreResult<()> {
        info!("[ConvDAO/DB] initialising conversation tables");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_conversations (
                conversation_id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(db)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_local_conversations_position
            ON local_conversations(position)
            "#,
        )
        .execute(db)
        .await?;

        info!("[ConvDAO/DB] conversation tables ready");
        Ok(())
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> StoreResult<ConversationRecord> {
        let body: String = row.try_get("record")?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ConversationBackend for SqliteConversationDao {
    async fn get_all(&self) -> StoreResult<Vec<ConversationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, record
            FROM local_conversations
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let records = rows
            .iter()
            .map(Self::decode)
            .collect::<StoreResult<Vec<_>>>()?;
        debug!("[ConvDAO] loaded {} conversations", records.len());
        Ok(records)
    }

    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM local_conversations WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn put(&self, record: &ConversationRecord) -> StoreResult<()> {
        let body = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO local_conversations (conversation_id, position, record, updated_at)
            VALUES (
                ?,
                (SELECT IFNULL(MAX(position), -1) + 1 FROM local_conversations),
                ?,
                ?
            )
            ON CONFLICT(conversation_id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id())
        .bind(&body)
        .bind(record.conversation.updated_at)
        .execute(&self.db)
        .await?;

        debug!(
            "[ConvDAO] saved conversation {} ({} messages)",
            record.id(),
            record.messages.len()
        );
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM local_conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        debug!("[ConvDAO] deleted conversation {}", conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::db::create_sqlite_pool;
    use crate::chat::types::{Conversation, Message};

    async fn dao() -> SqliteConversationDao {
        let pool = create_sqlite_pool("sqlite::memory:").await.unwrap();
        let dao = SqliteConversationDao::new(pool);
        dao.init_db().await.unwrap();
        dao
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dao = dao().await;
        let mut record = ConversationRecord::new(Conversation::new("c-1", "first"));
        record.messages.push(Message::user(Some("c-1".to_string()), "hi"));
        dao.put(&record).await.unwrap();

        assert_eq!(dao.get("c-1").await.unwrap(), Some(record));
        assert_eq!(dao.get("missing").await.unwrap(), None);

        dao.delete("c-1").await.unwrap();
        assert!(dao.get_all().await.unwrap().is_empty());
        // deleting twice is fine
        dao.delete("c-1").await.unwrap();
    }

    #[tokio::test]
    async fn replace_keeps_position() {
        let dao = dao().await;
        for id in ["a", "b", "c"] {
            dao.put(&ConversationRecord::new(Conversation::new(id, id)))
                .await
                .unwrap();
        }
        dao.put(&ConversationRecord::new(Conversation::new("a", "renamed")))
            .await
            .unwrap();

        let all = dao.get_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(all[0].conversation.title, "renamed");
    }
}
