//! Cancellation registry for the outbound stream
//!
//! Holds the single cancellation token of the stream currently being
//! generated and mediates the user's "stop generating" action.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Callback run synchronously when cancellation must persist partial output.
pub type SaveCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    token: Option<CancellationToken>,
    was_aborted: bool,
    save_callback: Option<SaveCallback>,
}

/// Owns at most one active cancellation token.
#[derive(Default)]
pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `token` and resets the manual-abort flag.
    ///
    /// A token that is still installed is orphaned, not cancelled; callers
    /// starting a genuinely new stream should `abort()` first.
    pub fn set(&self, token: Option<CancellationToken>) {
        let mut state = self.state.lock();
        if state.token.is_some() && token.is_some() {
            debug!("[Registry] replacing a token that was never aborted");
        }
        state.token = token;
        state.was_aborted = false;
    }

    pub fn get(&self) -> Option<CancellationToken> {
        self.state.lock().token.clone()
    }

    /// Cancels the installed token and runs the save callback.
    ///
    /// Returns `false` without side effects when no token is installed.
    pub fn abort(&self) -> bool {
        let (token, callback) = {
            let mut state = self.state.lock();
            let Some(token) = state.token.take() else {
                return false;
            };
            state.was_aborted = true;
            (token, state.save_callback.clone())
        };

        token.cancel();
        debug!("[Registry] stream aborted by user");
        // the callback may call back into the registry, so the lock is released first
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Drops the installed token after the stream ended on its own.
    /// The manual-abort flag is left as is.
    pub fn release(&self) {
        self.state.lock().token = None;
    }

    /// Whether the most recent termination was a manual abort.
    pub fn was_aborted(&self) -> bool {
        self.state.lock().was_aborted
    }

    pub fn set_save_callback(&self, callback: Option<SaveCallback>) {
        self.state.lock().save_callback = callback;
    }

    /// Runs the registered save callback, if any.
    pub fn trigger_save(&self) -> bool {
        let callback = self.state.lock().save_callback.clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Back to the initial state (token, abort flag and callback).
    pub fn clear(&self) {
        *self.state.lock() = RegistryState::default();
    }
}
