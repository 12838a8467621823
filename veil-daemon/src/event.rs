//! Daemon events and subscriber fan-out
//!
//! Every externally visible state change is wrapped in a [`DaemonEvent`] and
//! fanned out to all subscribed clients. Delivery is best-effort per
//! subscriber: each subscriber has its own unbounded queue, so a slow or
//! stuck subscriber never delays a state transition or other subscribers.
//! Subscribers only receive events emitted after they subscribed; the current
//! full state must be queried from the daemon handle instead.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use veil_types::device::{Device, DeviceEvent};
use veil_types::relay_list::RelayList;
use veil_types::states::TunnelState;

use crate::config::Settings;

/// Information about the app version currently running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppVersionInfo {
    /// Whether this version is still supported
    pub supported: bool,
    /// A newer version to upgrade to, if any
    pub suggested_upgrade: Option<String>,
}

/// A device that was removed from the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveDeviceEvent {
    /// The account the device was removed from
    pub account: String,
    /// The removed device
    pub removed_device: Device,
}

/// The notification envelope broadcast to subscribers on any state change
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// The tunnel state changed
    TunnelState(TunnelState),
    /// The settings changed
    Settings(Settings),
    /// A new relay list snapshot was installed
    RelayList(Arc<RelayList>),
    /// New app version information is available
    AppVersionInfo(AppVersionInfo),
    /// The device state changed
    Device(DeviceEvent),
    /// A device was removed from the account
    RemoveDevice(RemoveDeviceEvent),
}

/// Fans out daemon events to all current subscribers.
///
/// Cloning the broadcaster is cheap; all clones share the subscriber set.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<DaemonEvent>>>>,
}

impl EventBroadcaster {
    /// Create a broadcaster with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all events emitted from this point on
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        EventStream { rx }
    }

    /// Send an event to every live subscriber, pruning the disconnected.
    /// Never blocks.
    pub fn notify(&self, event: DaemonEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// A subscriber's ordered stream of daemon events
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<DaemonEvent>,
}

impl EventStream {
    /// Receive the next event. Returns `None` once the broadcaster is gone
    /// and all pending events have been drained.
    pub async fn next(&mut self) -> Option<DaemonEvent> {
        self.rx.recv().await
    }

    /// Receive the next event without waiting
    pub fn try_next(&mut self) -> Option<DaemonEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_types::states::TunnelState;

    fn state_event(locked_down: bool) -> DaemonEvent {
        DaemonEvent::TunnelState(TunnelState::Disconnected {
            location: None,
            locked_down,
        })
    }

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let broadcaster = EventBroadcaster::new();
        let mut stream = broadcaster.subscribe();

        broadcaster.notify(state_event(false));
        broadcaster.notify(state_event(true));

        let DaemonEvent::TunnelState(TunnelState::Disconnected { locked_down, .. }) =
            stream.next().await.unwrap()
        else {
            panic!("unexpected event");
        };
        assert!(!locked_down);

        let DaemonEvent::TunnelState(TunnelState::Disconnected { locked_down, .. }) =
            stream.next().await.unwrap()
        else {
            panic!("unexpected event");
        };
        assert!(locked_down);
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.notify(state_event(false));
        broadcaster.notify(state_event(true));

        let mut stream = broadcaster.subscribe();
        assert!(stream.try_next().is_none());

        broadcaster.notify(state_event(false));
        assert!(stream.try_next().is_some());
        assert!(stream.try_next().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let broadcaster = EventBroadcaster::new();
        // This subscriber never reads
        let _stalled = broadcaster.subscribe();
        let mut active = broadcaster.subscribe();

        // notify is synchronous and must not wait for the stalled subscriber
        for _ in 0..1000 {
            broadcaster.notify(state_event(false));
        }

        for _ in 0..1000 {
            assert!(active.try_next().is_some());
        }
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let broadcaster = EventBroadcaster::new();
        let stream = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(stream);
        broadcaster.notify(state_event(false));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
