//! Outbound streaming: lifecycle tracking, the send flow and the HTTP transport

pub mod session;
pub mod timer;
pub mod tracker;
pub mod transport;

pub use session::{ChatTransport, EventStream, SendOutcome, StreamCoordinator, StreamEvent};
pub use timer::SafetyTimer;
pub use tracker::{StreamState, StreamTracker, PENDING_SAVE_TIMEOUT};
pub use transport::{ndjson_events, HttpChatTransport};
