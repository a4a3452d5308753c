//! Sync triggers and connectivity edges

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// Why a sync round was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// Chat surface was mounted.
    Mount,
    /// App returned to the foreground.
    Visible,
    /// Network came back.
    Online,
    /// Explicit refresh. Still throttled.
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Mount => "mount",
            SyncTrigger::Visible => "visible",
            SyncTrigger::Online => "online",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Host-side switch for visibility and network state.
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
    visible: watch::Sender<bool>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool, visible: bool) -> Self {
        Self {
            online: watch::channel(online).0,
            visible: watch::channel(visible).0,
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|v| std::mem::replace(v, online) != online);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.send_if_modified(|v| std::mem::replace(v, visible) != visible);
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn subscribe(&self) -> ConnectivityWatcher {
        ConnectivityWatcher {
            online: self.online.subscribe(),
            visible: self.visible.subscribe(),
            online_open: true,
            visible_open: true,
        }
    }
}

/// Turns connectivity changes into triggers. Only false-to-true edges fire.
///
/// The monitor publishes real changes only, so an observed change that ends
/// at `true` means the value went through `false` since it was last seen.
pub struct ConnectivityWatcher {
    online: watch::Receiver<bool>,
    visible: watch::Receiver<bool>,
    online_open: bool,
    visible_open: bool,
}

impl ConnectivityWatcher {
    /// Waits for the next rising edge. `None` once the monitor is dropped.
    pub async fn next_trigger(&mut self) -> Option<SyncTrigger> {
        loop {
            if !self.online_open && !self.visible_open {
                return None;
            }

            tokio::select! {
                changed = self.online.changed(), if self.online_open => {
                    if changed.is_err() {
                        self.online_open = false;
                    } else if *self.online.borrow_and_update() {
                        return Some(SyncTrigger::Online);
                    }
                }
                changed = self.visible.changed(), if self.visible_open => {
                    if changed.is_err() {
                        self.visible_open = false;
                    } else if *self.visible.borrow_and_update() {
                        return Some(SyncTrigger::Visible);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_rising_edges_fire() {
        let monitor = ConnectivityMonitor::new(true, true);
        let mut watcher = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(true);
        assert_eq!(watcher.next_trigger().await, Some(SyncTrigger::Online));

        monitor.set_visible(false);
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            watcher.next_trigger(),
        )
        .await;
        assert!(pending.is_err());

        monitor.set_visible(true);
        assert_eq!(watcher.next_trigger().await, Some(SyncTrigger::Visible));
    }

    #[tokio::test]
    async fn closes_with_monitor() {
        let monitor = ConnectivityMonitor::default();
        let mut watcher = monitor.subscribe();
        drop(monitor);
        assert_eq!(watcher.next_trigger().await, None);
    }
}
