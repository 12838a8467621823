//! Periodic relay list refresh
//!
//! The relay list is fetched from the API on a fixed interval and pushed into
//! the selector. A fetch failure keeps the previous snapshot; selection keeps
//! working off stale data until the next successful refresh. The `etag` from
//! the previous snapshot is offered to the fetcher so an unchanged list can be
//! skipped cheaply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use veil_relay_selector::RelaySelector;
use veil_types::relay_list::RelayList;

use crate::error::{Error, Result};
use crate::event::{DaemonEvent, EventBroadcaster};

/// Source of relay list snapshots (the API endpoint, a cache file, a test
/// fixture)
#[async_trait]
pub trait RelayListFetcher: Send + Sync {
    /// Fetch the current relay list. `etag` is the tag of the snapshot we
    /// already hold; return `Ok(None)` if the list has not changed since.
    async fn fetch(&self, etag: Option<&str>) -> Result<Option<RelayList>>;
}

/// A fetcher that always reports the list as unchanged. Stands in until a
/// real API client is wired up; the selector then runs off the bundled list.
pub struct StaticRelayListFetcher;

#[async_trait]
impl RelayListFetcher for StaticRelayListFetcher {
    async fn fetch(&self, _etag: Option<&str>) -> Result<Option<RelayList>> {
        Ok(None)
    }
}

/// Handle controlling the background updater task
pub struct RelayListUpdater {
    update_tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl RelayListUpdater {
    /// Spawn the updater. It refreshes immediately, then on every tick of
    /// `interval`, pushing each new snapshot into `selector` and announcing
    /// it on `broadcaster`.
    pub fn spawn(
        fetcher: Box<dyn RelayListFetcher>,
        selector: Arc<RelaySelector>,
        broadcaster: EventBroadcaster,
        interval: Duration,
    ) -> Self {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(fetcher, selector, broadcaster, interval, update_rx));
        Self { update_tx, task }
    }

    /// Request a refresh outside the regular schedule
    pub fn update_now(&self) -> Result<()> {
        self.update_tx.send(()).map_err(|_| {
            Error::RelayListFetch("the relay list updater is not running".to_owned())
        })
    }

    /// Stop the updater task
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn run(
    fetcher: Box<dyn RelayListFetcher>,
    selector: Arc<RelaySelector>,
    broadcaster: EventBroadcaster,
    interval: Duration,
    mut update_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            request = update_rx.recv() => {
                if request.is_none() {
                    break;
                }
            }
        }

        let etag = selector.relay_list().etag.clone();
        match fetcher.fetch(etag.as_deref()).await {
            Ok(Some(new_list)) => {
                log::info!(
                    "installing new relay list with {} relays",
                    new_list.relays().count()
                );
                selector.set_relay_list(new_list.clone());
                broadcaster.notify(DaemonEvent::RelayList(Arc::new(new_list)));
            }
            Ok(None) => log::debug!("relay list is unchanged"),
            Err(error) => {
                // Keep the previous snapshot and try again next tick
                log::warn!("failed to fetch relay list: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use veil_relay_selector::SelectorConfig;
    use veil_types::relay_list::test_support::{relay, relay_list};

    struct ScriptedFetcher {
        responses: Mutex<Vec<Result<Option<RelayList>>>>,
    }

    #[async_trait]
    impl RelayListFetcher for ScriptedFetcher {
        async fn fetch(&self, _etag: Option<&str>) -> Result<Option<RelayList>> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(None))
        }
    }

    #[tokio::test]
    async fn test_new_snapshot_reaches_selector_and_subscribers() {
        let selector = Arc::new(RelaySelector::new(
            SelectorConfig::default(),
            RelayList::default(),
        ));
        let broadcaster = EventBroadcaster::new();
        let mut events = broadcaster.subscribe();

        let mut list = relay_list(vec![relay(
            "se-got-wg-001",
            "se",
            "got",
            true,
            "provider-a",
            100,
        )]);
        list.etag = Some("v2".to_owned());
        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![Ok(Some(list))]),
        };

        let updater = RelayListUpdater::spawn(
            Box::new(fetcher),
            selector.clone(),
            broadcaster,
            Duration::from_secs(3600),
        );

        // First fetch happens on the initial tick
        let event = events.next().await.unwrap();
        assert!(matches!(event, DaemonEvent::RelayList(_)));
        assert_eq!(selector.relay_list().etag.as_deref(), Some("v2"));
        assert_eq!(selector.relay_list().relays().count(), 1);

        updater.stop();
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let initial = relay_list(vec![relay(
            "de-ber-wg-001",
            "de",
            "ber",
            false,
            "provider-b",
            100,
        )]);
        let selector = Arc::new(RelaySelector::new(SelectorConfig::default(), initial));
        let broadcaster = EventBroadcaster::new();

        let fetcher = ScriptedFetcher {
            responses: Mutex::new(vec![Err(Error::RelayListFetch("timed out".to_owned()))]),
        };
        let updater = RelayListUpdater::spawn(
            Box::new(fetcher),
            selector.clone(),
            broadcaster.clone(),
            Duration::from_secs(3600),
        );

        updater.update_now().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(selector.relay_list().relays().count(), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);

        updater.stop();
    }
}
