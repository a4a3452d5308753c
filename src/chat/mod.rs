pub mod cancellation;
pub mod conversation;
pub mod db;
pub mod engine;
pub mod error;
pub mod projection;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancellation::{CancellationRegistry, SaveCallback};
pub use engine::{ChatEngine, EngineConfig};
pub use error::{SendError, StoreError, StoreResult, StreamError};
pub use projection::{
    project_active_conversation_messages, project_conversation_list, ConversationListItem,
    MessageView,
};
