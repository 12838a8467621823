//! End-to-end tests for the daemon facade: login gating, runtime settings
//! changes and device revocation, driven through a provider that always
//! succeeds.

use std::sync::Arc;

use async_trait::async_trait;

use veil_daemon::event::{DaemonEvent, EventStream};
use veil_daemon::tunnel::{EstablishError, TunnelParameters, TunnelProvider};
use veil_daemon::{Config, Daemon, Error, StaticRelayListFetcher};
use veil_types::device::{AccountAndDevice, Device, DeviceEventCause, DeviceState};
use veil_types::relay_list::test_support::{relay, relay_list};
use veil_types::relay_list::RelayList;
use veil_types::states::{
    ActionAfterDisconnect, AuthFailedError, ErrorStateCause, TunnelMetadata, TunnelState,
};

struct OkProvider;

#[async_trait]
impl TunnelProvider for OkProvider {
    async fn establish(
        &self,
        _parameters: TunnelParameters,
    ) -> Result<TunnelMetadata, EstablishError> {
        Ok(TunnelMetadata {
            interface: "veil0".to_owned(),
            ips: vec!["10.64.0.2".parse().unwrap()],
            ipv4_gateway: Some("10.64.0.1".parse().unwrap()),
            ipv6_gateway: None,
        })
    }

    async fn tear_down(&self) {}
}

fn fixture_list() -> RelayList {
    relay_list([relay("se-got-wg-001", "se", "got", true, "provider-a", 100)])
}

fn account() -> AccountAndDevice {
    AccountAndDevice {
        account: "1234567890".to_owned(),
        device: Device {
            id: "device-1".to_owned(),
            name: "brave otter".to_owned(),
            pubkey: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_owned(),
        },
    }
}

fn start_daemon() -> Daemon {
    Daemon::start(
        Config::default(),
        Arc::new(OkProvider),
        Box::new(StaticRelayListFetcher),
        fixture_list(),
    )
    .unwrap()
}

/// Wait for the next tunnel state change, skipping other event kinds
async fn next_state(events: &mut EventStream) -> TunnelState {
    loop {
        match events.next().await.expect("event stream ended") {
            DaemonEvent::TunnelState(state) => return state,
            _ => continue,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_requires_login_on_daemon_and_handle() {
    let daemon = start_daemon();
    let handle = daemon.handle();

    assert!(matches!(daemon.connect(), Err(Error::NotLoggedIn)));
    assert!(matches!(handle.connect(), Err(Error::NotLoggedIn)));
    assert!(matches!(handle.reconnect(), Err(Error::NotLoggedIn)));

    daemon.login(account());
    assert!(handle.device_state().is_logged_in());

    let mut events = daemon.subscribe();
    handle.connect().unwrap();
    next_state(&mut events).await; // connecting
    assert!(next_state(&mut events).await.is_connected());

    daemon.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_settings_broadcasts_and_reconnects() {
    let mut daemon = start_daemon();
    daemon.login(account());

    let mut events = daemon.subscribe();
    daemon.connect().unwrap();
    next_state(&mut events).await; // connecting
    assert!(next_state(&mut events).await.is_connected());

    let mut settings = daemon.settings().clone();
    settings.lockdown_mode = true;
    daemon.set_settings(settings.clone()).unwrap();

    // The settings event precedes the reconnect cycle
    let event = events.next().await.unwrap();
    let DaemonEvent::Settings(broadcast) = event else {
        panic!("expected settings event");
    };
    assert!(broadcast.lockdown_mode);
    assert_eq!(daemon.settings(), &settings);

    assert_eq!(
        next_state(&mut events).await,
        TunnelState::Disconnecting(ActionAfterDisconnect::Reconnect)
    );
    assert!(matches!(
        next_state(&mut events).await,
        TunnelState::Connecting { .. }
    ));
    let connected = next_state(&mut events).await;
    assert!(connected.is_connected());

    daemon.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_settings_are_a_no_op() {
    let mut daemon = start_daemon();
    let mut events = daemon.subscribe();

    let settings = daemon.settings().clone();
    daemon.set_settings(settings).unwrap();
    assert!(events.try_next().is_none());

    daemon.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_device_revocation_blocks_active_tunnel() {
    let daemon = start_daemon();
    daemon.login(account());

    let mut events = daemon.subscribe();
    daemon.connect().unwrap();
    next_state(&mut events).await; // connecting
    assert!(next_state(&mut events).await.is_connected());

    daemon.device_revoked().unwrap();
    assert_eq!(daemon.device_state(), DeviceState::Revoked);

    // The device event arrives before the tunnel is blocked
    let event = events.next().await.unwrap();
    let DaemonEvent::Device(device_event) = event else {
        panic!("expected device event");
    };
    assert_eq!(device_event.cause, DeviceEventCause::Revoked);
    assert_eq!(device_event.new_state, DeviceState::Revoked);

    let state = next_state(&mut events).await;
    let TunnelState::Error(error_state) = state else {
        panic!("expected error state, got {state}");
    };
    assert_eq!(
        *error_state.cause(),
        ErrorStateCause::AuthFailed(Some(AuthFailedError::InvalidAccount))
    );

    // Reconnecting a revoked device is refused
    assert!(matches!(daemon.connect(), Err(Error::NotLoggedIn)));

    daemon.shutdown().await;
}
