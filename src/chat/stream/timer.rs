//! Cancelable one-shot timer
//!
//! At most one timer task is live per `SafetyTimer`. Every `arm` aborts the
//! previous task and bumps a generation counter; a callback from a superseded
//! generation must be ignored by checking `disarm_fired` under the owner's lock.
//!
//! The timer remembers the runtime it was created in, so `arm` also works
//! from threads outside that runtime (UI callbacks, signal handlers).

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug)]
pub struct SafetyTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
}

impl Default for SafetyTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyTimer {
    /// Captures the current runtime, if any.
    pub fn new() -> Self {
        Self::with_runtime(Handle::try_current().ok())
    }

    pub fn with_runtime(runtime: Option<Handle>) -> Self {
        Self {
            generation: 0,
            handle: None,
            runtime,
        }
    }

    /// Cancels any live timer and starts a new one. `on_fire` receives the
    /// generation it was armed with.
    ///
    /// Without a captured runtime the caller's runtime is used. With neither,
    /// the timer stays disarmed and `None` is returned.
    pub fn arm<F>(&mut self, after: Duration, on_fire: F) -> Option<u64>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let Some(runtime) = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            warn!("[SafetyTimer] no tokio runtime available, timer not armed");
            return None;
        };
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_fire(generation);
        }));
        Some(generation)
    }

    /// Cancels the live timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called from the fired callback: accepts the firing only if `generation`
    /// is still the armed one, and disarms the timer.
    pub fn disarm_fired(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && self.generation == generation {
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for SafetyTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
