//! Chat engine
//!
//! The context object a host creates once. It owns the store, the stream
//! tracker, the cancellation registry and the sync scheduler and wires them
//! to the durable backend and the remote endpoints.

use crate::chat::cancellation::CancellationRegistry;
use crate::chat::conversation::api::{ConversationApi, RemoteConversationSource};
use crate::chat::conversation::dao::{ConversationBackend, SqliteConversationDao};
use crate::chat::conversation::listener::{EmptySyncListener, SyncListener};
use crate::chat::conversation::models::SyncSchedulerConfig;
use crate::chat::conversation::service::{SyncOutcome, SyncScheduler};
use crate::chat::conversation::store::ConversationStore;
use crate::chat::conversation::triggers::{ConnectivityMonitor, SyncTrigger};
use crate::chat::db::create_sqlite_pool_with_tables;
use crate::chat::error::SendError;
use crate::chat::projection::{ConversationListItem, MessageView};
use crate::chat::stream::session::{ChatTransport, SendOutcome, StreamCoordinator};
use crate::chat::stream::tracker::StreamTracker;
use crate::chat::stream::transport::HttpChatTransport;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_id: String,
    /// Sent as the `token` header on every request.
    pub token: String,
    pub api_base_url: String,
    /// e.g. `sqlite://chat_sync.db?mode=rwc`
    pub db_url: String,
    pub sync: SyncSchedulerConfig,
}

impl EngineConfig {
    pub fn new(user_id: String, token: String) -> Self {
        Self {
            user_id,
            token,
            api_base_url: "http://localhost:10002".to_string(),
            db_url: "sqlite://chat_sync.db?mode=rwc".to_string(),
            sync: SyncSchedulerConfig::default(),
        }
    }
}

fn build_http_client(token: &str) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::HeaderName::from_static("token"),
        reqwest::header::HeaderValue::from_str(token).context("invalid token")?,
    );
    reqwest::ClientBuilder::new()
        .default_headers(headers)
        .build()
        .context("building HTTP client")
}

const TRIGGER_QUEUE: usize = 16;

pub struct ChatEngine {
    store: Arc<ConversationStore>,
    tracker: Arc<StreamTracker>,
    registry: Arc<CancellationRegistry>,
    scheduler: Arc<SyncScheduler>,
    coordinator: StreamCoordinator,
    connectivity: ConnectivityMonitor,
    trigger_tx: mpsc::Sender<SyncTrigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<SyncTrigger>>>,
    shutdown: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatEngine {
    /// Opens the SQLite store and connects to the HTTP endpoints.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with_listener(config, Arc::new(EmptySyncListener)).await
    }

    pub async fn open_with_listener(
        config: EngineConfig,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        info!(
            "[Engine] opening engine, user: {}, api: {}, db: {}",
            config.user_id, config.api_base_url, config.db_url
        );
        let pool = create_sqlite_pool_with_tables(&config.db_url).await?;
        let backend = Arc::new(SqliteConversationDao::new(pool));

        let client = build_http_client(&config.token)?;
        let remote = Arc::new(ConversationApi::new(
            client.clone(),
            config.api_base_url.clone(),
            config.user_id.clone(),
        ));
        let transport = Arc::new(HttpChatTransport::new(
            client,
            config.api_base_url.clone(),
            config.user_id.clone(),
        ));

        Self::with_parts(config.sync, backend, remote, transport, listener).await
    }

    /// Builds an engine over caller-supplied backends (tests, embedders).
    pub async fn with_parts(
        sync_config: SyncSchedulerConfig,
        backend: Arc<dyn ConversationBackend>,
        remote: Arc<dyn RemoteConversationSource>,
        transport: Arc<dyn ChatTransport>,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        let store = Arc::new(
            ConversationStore::open(backend)
                .await
                .context("loading local conversations")?,
        );
        let tracker = Arc::new(StreamTracker::new());
        let registry = Arc::new(CancellationRegistry::new());
        let scheduler = Arc::new(SyncScheduler::with_listener(
            sync_config,
            store.clone(),
            tracker.clone(),
            remote,
            listener,
        ));
        let coordinator =
            StreamCoordinator::new(transport, registry.clone(), tracker.clone(), store.clone());
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE);

        Ok(Self {
            store,
            tracker,
            registry,
            scheduler,
            coordinator,
            connectivity: ConnectivityMonitor::default(),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            shutdown: CancellationToken::new(),
            sync_task: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<StreamTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Spawns the background sync loop. Returns `false` if it already runs.
    pub fn start_sync(&self) -> bool {
        let Some(triggers) = self.trigger_rx.lock().take() else {
            return false;
        };
        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(scheduler.run(
            triggers,
            self.connectivity.subscribe(),
            self.shutdown.child_token(),
        ));
        *self.sync_task.lock() = Some(handle);
        info!("[Engine] background sync started");
        true
    }

    /// Queues a trigger for the background loop. `false` if the queue is full
    /// or the loop is gone.
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        match self.trigger_tx.try_send(trigger) {
            Ok(()) => true,
            Err(e) => {
                warn!("[Engine] sync trigger {} dropped: {}", trigger, e);
                false
            }
        }
    }

    /// Runs a round right away, on the caller's task.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.scheduler.trigger(trigger).await
    }

    pub async fn send(&self, content: &str) -> Result<SendOutcome, SendError> {
        self.coordinator.send(content).await
    }

    /// "Stop generating". Returns `false` when nothing is streaming.
    /// Safe to call from any thread; the pending-save timer runs on the
    /// runtime the engine was built in.
    pub fn stop_generating(&self) -> bool {
        self.registry.abort()
    }

    /// Switches the UI to a stored conversation, or to a new chat with `None`.
    pub fn select_conversation(&self, conversation_id: Option<String>) -> bool {
        self.store.set_active(conversation_id)
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        self.scheduler.delete_conversation(conversation_id).await
    }

    pub fn conversation_list(&self) -> Vec<ConversationListItem> {
        self.store.project_conversation_list()
    }

    pub fn active_messages(&self) -> Vec<MessageView> {
        self.store.project_active_conversation_messages()
    }

    /// Stops the sync loop and drops any in-flight stream token.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.sync_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[Engine] sync task ended abnormally: {}", e);
            }
        }
        self.registry.clear();
        info!("[Engine] shut down");
    }
}
