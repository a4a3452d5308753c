pub mod chat;

// common entry points
pub use chat::{
    cancellation::CancellationRegistry,
    conversation::{
        ConversationStore, SyncOutcome, SyncReport, SyncScheduler, SyncSchedulerConfig,
        SyncTrigger,
    },
    engine::{ChatEngine, EngineConfig},
    error::{SendError, StoreError, StreamError},
    stream::{StreamCoordinator, StreamTracker},
    types::{Conversation, Message, MessageStatus, Role},
};
