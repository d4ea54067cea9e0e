//! Connectivity tracking.
//!
//! `NetworkMonitor` owns the online flag. Platform signals and the HTTP probe
//! report through [`NetworkMonitor::set_online`]; consumers either read the
//! current state, watch it, or subscribe to transition events.

mod probe;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::util::SharedClock;

pub use probe::ConnectivityProbe;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Current connectivity as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_online: bool,
    /// Unix ms of the last online/offline edge, `None` before the first one
    pub last_transition_at: Option<i64>,
}

/// Connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
    /// Emitted once per offline to online edge, after `Online`
    Reconnected,
}

/// Shared connectivity state with change notification.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<NetworkState>>,
    events: broadcast::Sender<NetworkEvent>,
    clock: SharedClock,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool, clock: SharedClock) -> Self {
        let (state, _) = watch::channel(NetworkState {
            is_online: initially_online,
            last_transition_at: None,
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(state),
            events,
            clock,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    pub fn state(&self) -> NetworkState {
        *self.state.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Receive transition events; drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Record a connectivity signal.
    ///
    /// Returns `true` when the signal changed the state. Repeated identical
    /// signals are ignored and emit nothing.
    pub fn set_online(&self, online: bool) -> bool {
        let now = self.clock.now_ms();
        let changed = self.state.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            state.last_transition_at = Some(now);
            true
        });

        if !changed {
            return false;
        }

        if online {
            tracing::info!("Network connection restored");
            self.emit(NetworkEvent::Online);
            self.emit(NetworkEvent::Reconnected);
        } else {
            tracing::warn!("Network connection lost");
            self.emit(NetworkEvent::Offline);
        }
        true
    }

    fn emit(&self, event: NetworkEvent) {
        if let Err(error) = self.events.send(event) {
            tracing::debug!("No subscribers for network event: {:?}", error.0);
        }
    }
}
