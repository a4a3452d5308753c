//! Conversation module: local store, durable backends and remote sync
//!
//! Layers:
//! - `types`: remote DTOs
//! - `models`: local records and settings
//! - `dao` / `memory`: durable backends
//! - `store`: in-memory view over a backend
//! - `api`: remote authority
//! - `service`: background sync scheduler

pub mod api;
pub mod dao;
pub mod listener;
pub mod memory;
pub mod models;
pub mod service;
pub mod store;
pub mod triggers;
pub mod types;

pub use api::{ConversationApi, RemoteConversationSource};
pub use dao::{ConversationBackend, SqliteConversationDao};
pub use listener::{EmptySyncListener, SyncListener};
pub use memory::InMemoryConversationBackend;
pub use models::{ConversationRecord, OptimisticSlot, SyncSchedulerConfig};
pub use service::{SyncOutcome, SyncReport, SyncScheduler};
pub use store::{ConversationStore, DeltaStats, StoreSnapshot};
pub use triggers::{ConnectivityMonitor, ConnectivityWatcher, SyncTrigger};
pub use types::ConversationDelta;
