//! # Connectivity Monitor
//!
//! Tracks whether the remote is reachable and announces transitions.
//!
//! ```text
//! ┌──────────────────────┐   set_online(bool)   ┌──────────────────────────┐
//! │ Host environment     │ ───────────────────► │                          │
//! │ (OS network events)  │                      │   ConnectivityMonitor    │
//! └──────────────────────┘                      │                          │
//! ┌──────────────────────┐   health_probe()     │  watch<bool>   (state)   │
//! │ Probe loop (30s)     │ ───────────────────► │  broadcast<Event>        │
//! └──────────────────────┘                      └────────────┬─────────────┘
//!                                                            │ BecameOnline
//!                                                            ▼
//!                                                     Drain worker
//! ```
//!
//! Repeated reports of the same state are absorbed; only transitions produce
//! an event.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::remote::RemoteApi;

/// Capacity of the transition event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

impl std::fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityEvent::BecameOnline => write!(f, "became_online"),
            ConnectivityEvent::BecameOffline => write!(f, "became_offline"),
        }
    }
}

/// Shared online/offline state. Cheap to clone; all clones see the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        ConnectivityMonitor {
            state: Arc::new(state),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Reports the current reachability. Returns true if this was a
    /// transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            let event = if online {
                ConnectivityEvent::BecameOnline
            } else {
                ConnectivityEvent::BecameOffline
            };
            info!(%event, "Connectivity changed");
            // No subscribers is fine; the state itself is still updated.
            let _ = self.events.send(event);
        }

        changed
    }

    /// Subscribes to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Watches the raw state, e.g. to abort a call when the link drops.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Resolves once the monitor reports offline. Never resolves if the
    /// state channel is gone.
    pub async fn wait_offline(&self) {
        let mut rx = self.watch();
        if rx.wait_for(|online| !*online).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Spawns the periodic health probe. The first probe runs immediately.
    pub fn spawn_probe(
        &self,
        remote: Arc<dyn RemoteApi>,
        every: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("Health probe stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let reachable = tokio::time::timeout(timeout, remote.health_probe())
                            .await
                            .unwrap_or(false);
                        debug!(reachable, "Health probe");
                        monitor.set_online(reachable);
                    }
                }
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
