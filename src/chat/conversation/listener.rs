//! Sync progress callbacks

use crate::chat::conversation::service::SyncReport;
use crate::chat::conversation::triggers::SyncTrigger;
use async_trait::async_trait;

/// Observer of background sync rounds. Called from the scheduler task.
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// A round passed the throttle and is about to fetch.
    async fn on_sync_start(&self, trigger: SyncTrigger);

    async fn on_sync_finish(&self, report: &SyncReport);

    /// A delta was fetched and applied.
    async fn on_conversation_synced(&self, conversation_id: &str);

    async fn on_conversation_sync_failed(&self, conversation_id: &str, error: &str);
}

/// Default listener that ignores everything.
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_start(&self, _trigger: SyncTrigger) {}
    async fn on_sync_finish(&self, _report: &SyncReport) {}
    async fn on_conversation_synced(&self, _conversation_id: &str) {}
    async fn on_conversation_sync_failed(&self, _conversation_id: &str, _error: &str) {}
}
