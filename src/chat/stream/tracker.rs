//! Stream lifecycle tracker
//!
//! Records whether an assistant stream is active, which conversation it
//! belongs to, and whether a post-abort save is still being flushed. The
//! background sync scheduler asks `should_block_sync` before touching any
//! conversation.

use crate::chat::error::StreamError;
use crate::chat::stream::timer::SafetyTimer;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a pending save may block sync before it is force-cleared.
pub const PENDING_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// `None` while a brand-new conversation has no server id yet.
    Streaming(Option<String>),
}

struct TrackerInner {
    state: StreamState,
    pending_save: bool,
    safety_timer: SafetyTimer,
    safety_expirations: u64,
    pending_save_arms: u64,
}

pub struct StreamTracker {
    inner: Arc<Mutex<TrackerInner>>,
    pending_save_timeout: Duration,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::with_timeout(PENDING_SAVE_TIMEOUT)
    }

    /// The safety timer runs on the runtime current at construction, so
    /// `set_pending_save` may later be called from any thread.
    pub fn with_timeout(pending_save_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                state: StreamState::Idle,
                pending_save: false,
                safety_timer: SafetyTimer::new(),
                safety_expirations: 0,
                pending_save_arms: 0,
            })),
            pending_save_timeout,
        }
    }

    /// Marks a stream as active. Only one stream may exist at a time; a
    /// second start while streaming is rejected.
    pub fn start_stream(&self, conversation_id: Option<String>) -> Result<(), StreamError> {
        let mut inner = self.inner.lock();
        if let StreamState::Streaming(current) = &inner.state {
            warn!(
                "[StreamTracker] rejected second stream, active conversation: {:?}",
                current
            );
            return Err(StreamError::AlreadyStreaming {
                conversation_id: current.clone(),
            });
        }
        debug!("[StreamTracker] stream started: {:?}", conversation_id);
        inner.state = StreamState::Streaming(conversation_id);
        Ok(())
    }

    /// Upgrades the tracked id once the server assigns one. No-op while idle.
    pub fn update_stream_conversation_id(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        if let StreamState::Streaming(current) = &mut inner.state {
            debug!(
                "[StreamTracker] stream conversation id: {:?} -> {}",
                current, conversation_id
            );
            *current = Some(conversation_id.to_string());
        }
    }

    /// Back to `Idle`. The pending-save flag is independent and survives.
    pub fn end_stream(&self) {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Idle {
            debug!("[StreamTracker] stream ended");
        }
        inner.state = StreamState::Idle;
    }

    /// `true` (re)arms the safety timer, `false` cancels it.
    pub fn set_pending_save(&self, pending: bool) {
        let mut inner = self.inner.lock();
        inner.pending_save = pending;
        if pending {
            inner.pending_save_arms += 1;
            let weak = Arc::downgrade(&self.inner);
            let armed = inner
                .safety_timer
                .arm(self.pending_save_timeout, move |generation| {
                    Self::expire_pending_save(&weak, generation)
                });
            if armed.is_some() {
                debug!("[StreamTracker] pending save armed");
            } else {
                warn!("[StreamTracker] pending save set without a safety timer");
            }
        } else if inner.safety_timer.cancel() {
            debug!("[StreamTracker] pending save cleared");
        }
    }

    fn expire_pending_save(inner: &Weak<Mutex<TrackerInner>>, generation: u64) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock();
        if inner.safety_timer.disarm_fired(generation) && inner.pending_save {
            inner.pending_save = false;
            inner.safety_expirations += 1;
            warn!("[StreamTracker] pending save was never cleared, force-clearing to unblock sync");
        }
    }

    pub fn is_pending_save(&self) -> bool {
        self.inner.lock().pending_save
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.inner.lock().state, StreamState::Streaming(_))
    }

    pub fn streaming_conversation_id(&self) -> Option<String> {
        match &self.inner.lock().state {
            StreamState::Streaming(id) => id.clone(),
            StreamState::Idle => None,
        }
    }

    pub fn is_streaming_conversation(&self, conversation_id: &str) -> bool {
        matches!(
            &self.inner.lock().state,
            StreamState::Streaming(Some(id)) if id == conversation_id
        )
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state.clone()
    }

    /// A pending save blocks every conversation; an active stream only blocks
    /// its own.
    pub fn should_block_sync(&self, conversation_id: &str) -> bool {
        let inner = self.inner.lock();
        if inner.pending_save {
            return true;
        }
        matches!(
            &inner.state,
            StreamState::Streaming(Some(id)) if id == conversation_id
        )
    }

    /// How many times the safety timer had to clear a forgotten pending save.
    pub fn safety_expirations(&self) -> u64 {
        self.inner.lock().safety_expirations
    }

    /// How many times pending-save was set.
    pub fn pending_save_arms(&self) -> u64 {
        self.inner.lock().pending_save_arms
    }
}
