//! Background conversation sync
//!
//! Pulls remote deltas into the local store on mount, foreground and
//! reconnect, throttled to one round per `min_interval`. Local writes always
//! win: a conversation that is streaming, or any conversation while a
//! cancelled stream is still being saved, is left alone for the round.

use crate::chat::conversation::api::RemoteConversationSource;
use crate::chat::conversation::listener::{EmptySyncListener, SyncListener};
use crate::chat::conversation::models::SyncSchedulerConfig;
use crate::chat::conversation::store::ConversationStore;
use crate::chat::conversation::triggers::{ConnectivityWatcher, SyncTrigger};
use crate::chat::stream::tracker::StreamTracker;
use crate::chat::types::Conversation;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-conversation results of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub synced: Vec<String>,
    /// Blocked before the fetch.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Fetched, but a local write started meanwhile so the delta was dropped.
    pub discarded: Vec<String>,
}

impl SyncReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            synced: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            discarded: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Throttled { retry_after: Duration },
    Ran(SyncReport),
}

pub struct SyncScheduler {
    config: SyncSchedulerConfig,
    store: Arc<ConversationStore>,
    tracker: Arc<StreamTracker>,
    remote: Arc<dyn RemoteConversationSource>,
    listener: Arc<dyn SyncListener>,
    last_attempt: Mutex<Option<Instant>>,
    /// Where the next round starts among unchanged local conversations.
    rotation: Mutex<usize>,
}

impl SyncScheduler {
    pub fn new(
        config: SyncSchedulerConfig,
        store: Arc<ConversationStore>,
        tracker: Arc<StreamTracker>,
        remote: Arc<dyn RemoteConversationSource>,
    ) -> Self {
        Self::with_listener(config, store, tracker, remote, Arc::new(EmptySyncListener))
    }

    pub fn with_listener(
        config: SyncSchedulerConfig,
        store: Arc<ConversationStore>,
        tracker: Arc<StreamTracker>,
        remote: Arc<dyn RemoteConversationSource>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            config,
            store,
            tracker,
            remote,
            listener,
            last_attempt: Mutex::new(None),
            rotation: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &SyncSchedulerConfig {
        &self.config
    }

    /// Records an attempt unless one happened less than `min_interval` ago.
    fn begin_attempt(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut last = self.last_attempt.lock();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.config.min_interval {
                return Some(self.config.min_interval - elapsed);
            }
        }
        *last = Some(now);
        None
    }

    /// Runs one sync round for `trigger`, or reports that it was throttled.
    /// Failures are contained in the report; the attempt still counts.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncOutcome {
        if let Some(retry_after) = self.begin_attempt() {
            debug!(
                "[SyncScheduler] {} trigger throttled, retry in {:?}",
                trigger, retry_after
            );
            return SyncOutcome::Throttled { retry_after };
        }

        info!("[SyncScheduler] sync round started ({})", trigger);
        self.listener.on_sync_start(trigger).await;

        let (ids, listed) = self.eligible_conversations().await;
        let mut report = SyncReport::new(trigger);
        for id in ids {
            self.sync_one(&id, listed.get(&id), &mut report).await;
        }

        info!(
            "[SyncScheduler] sync round finished ({}): synced={}, skipped={}, failed={}, discarded={}",
            trigger,
            report.synced.len(),
            report.skipped.len(),
            report.failed.len(),
            report.discarded.len()
        );
        self.listener.on_sync_finish(&report).await;
        SyncOutcome::Ran(report)
    }

    /// Picks at most `max_batch` conversations. Listed entries that are
    /// missing locally or newer remotely come first, in list order. Remaining
    /// slots go to the other local conversations (most recently updated
    /// first), rotating between rounds so every one is reached eventually.
    /// Listed entries come back with their metadata.
    async fn eligible_conversations(&self) -> (Vec<String>, HashMap<String, Conversation>) {
        let snapshot = self.store.snapshot();
        let max_batch = self.config.max_batch;

        let mut listed = HashMap::new();
        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        match self.remote.list_conversations(self.config.page_size).await {
            Ok(remote) => {
                for conversation in remote {
                    if !seen.insert(conversation.id.clone()) {
                        continue;
                    }
                    let changed = match snapshot.conversation(&conversation.id) {
                        None => true,
                        Some(local) => conversation.updated_at > local.updated_at,
                    };
                    if changed && ids.len() < max_batch {
                        ids.push(conversation.id.clone());
                    }
                    listed.insert(conversation.id.clone(), conversation);
                }
            }
            Err(e) => warn!(
                "[SyncScheduler] remote list failed, syncing local conversations only: {:#}",
                e
            ),
        }
        let changed = ids.len();

        let mut rest: Vec<(&str, i64)> = snapshot
            .records()
            .filter(|r| !ids.iter().any(|id| id == r.id()))
            .map(|r| (r.id(), r.conversation.updated_at))
            .collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1));

        let room = max_batch.saturating_sub(ids.len()).min(rest.len());
        if room > 0 {
            let mut rotation = self.rotation.lock();
            let offset = *rotation % rest.len();
            ids.extend(
                rest.iter()
                    .cycle()
                    .skip(offset)
                    .take(room)
                    .map(|(id, _)| id.to_string()),
            );
            *rotation = (offset + room) % rest.len();
        }

        debug!(
            "[SyncScheduler] {} conversations eligible ({} changed remotely)",
            ids.len(),
            changed
        );
        (ids, listed)
    }

    async fn sync_one(
        &self,
        conversation_id: &str,
        listed: Option<&Conversation>,
        report: &mut SyncReport,
    ) {
        if self.tracker.should_block_sync(conversation_id) {
            debug!("[SyncScheduler] {} busy locally, skipped", conversation_id);
            report.skipped.push(conversation_id.to_string());
            return;
        }

        let since = self.store.sync_cursor(conversation_id);
        let mut delta = match self
            .remote
            .fetch_conversation_delta(conversation_id, since.as_deref())
            .await
        {
            Ok(delta) => delta,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(
                    "[SyncScheduler] fetching {} failed: {}",
                    conversation_id, message
                );
                report.failed.push(conversation_id.to_string());
                self.listener
                    .on_conversation_sync_failed(conversation_id, &message)
                    .await;
                return;
            }
        };

        // a stream or save may have started while the fetch was in flight
        if self.tracker.should_block_sync(conversation_id) {
            info!(
                "[SyncScheduler] {} became busy during fetch, delta discarded",
                conversation_id
            );
            report.discarded.push(conversation_id.to_string());
            return;
        }

        if delta.conversation.is_none() {
            delta.conversation = listed.cloned();
        }
        match self.store.apply_delta(conversation_id, delta).await {
            Ok(stats) => {
                debug!(
                    "[SyncScheduler] {} applied: {} messages, written={}",
                    conversation_id, stats.messages_applied, stats.written
                );
                report.synced.push(conversation_id.to_string());
                self.listener.on_conversation_synced(conversation_id).await;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    "[SyncScheduler] applying delta for {} failed: {}",
                    conversation_id, message
                );
                report.failed.push(conversation_id.to_string());
                self.listener
                    .on_conversation_sync_failed(conversation_id, &message)
                    .await;
            }
        }
    }

    /// Drives the scheduler until `shutdown` fires: one `Mount` round at
    /// start, then every explicit trigger and every connectivity edge.
    pub async fn run(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        mut connectivity: ConnectivityWatcher,
        shutdown: CancellationToken,
    ) {
        info!("[SyncScheduler] started");
        self.trigger(SyncTrigger::Mount).await;

        let mut triggers_open = true;
        let mut connectivity_open = true;
        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = triggers.recv(), if triggers_open => match next {
                    Some(trigger) => trigger,
                    None => {
                        triggers_open = false;
                        continue;
                    }
                },
                next = connectivity.next_trigger(), if connectivity_open => match next {
                    Some(trigger) => trigger,
                    None => {
                        connectivity_open = false;
                        continue;
                    }
                },
            };
            self.trigger(trigger).await;
        }
        info!("[SyncScheduler] stopped");
    }

    /// Deletes remotely first, then mirrors the deletion locally.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        self.remote
            .delete_conversation(conversation_id)
            .await
            .with_context(|| format!("deleting conversation {conversation_id} remotely"))?;
        let removed = self
            .store
            .remove_conversation(conversation_id)
            .await
            .with_context(|| format!("deleting conversation {conversation_id} locally"))?;
        Ok(removed)
    }
}
