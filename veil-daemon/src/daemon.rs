//! The daemon facade
//!
//! [`Daemon`] owns the long-lived pieces (relay selector, tunnel state
//! machine, relay list updater, event broadcaster) and exposes the operations
//! clients perform: connect, disconnect, change settings, manage the device,
//! subscribe to events. A cheap [`DaemonHandle`] clone can be passed to
//! frontends that only need to drive the tunnel and observe state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use veil_relay_selector::{RelaySelector, SelectorConfig};
use veil_types::device::{AccountAndDevice, DeviceEvent, DeviceEventCause, DeviceState};
use veil_types::relay_list::RelayList;
use veil_types::states::{AuthFailedError, ErrorStateCause, TunnelState};

use crate::config::{Config, Settings};
use crate::error::{Error, Result};
use crate::event::{DaemonEvent, EventBroadcaster, EventStream};
use crate::relay_list::{RelayListFetcher, RelayListUpdater};
use crate::state_machine::{self, StateMachineHandle, TunnelCommand};
use crate::tunnel::{TunnelProvider, TunnelProviderEvent};

/// The running daemon
pub struct Daemon {
    settings: Settings,
    /// Shared with every [`DaemonHandle`] so the login gate cannot be
    /// sidestepped through a handle
    device_state: Arc<Mutex<DeviceState>>,
    selector: Arc<RelaySelector>,
    broadcaster: EventBroadcaster,
    state_machine: StateMachineHandle,
    state_machine_task: JoinHandle<()>,
    relay_list_updater: RelayListUpdater,
    provider_event_tx: mpsc::UnboundedSender<TunnelProviderEvent>,
}

impl Daemon {
    /// Start the daemon services.
    ///
    /// `relay_list` is the initial (bundled or cached) snapshot; `fetcher`
    /// keeps it fresh in the background.
    pub fn start(
        config: Config,
        provider: Arc<dyn TunnelProvider>,
        fetcher: Box<dyn RelayListFetcher>,
        relay_list: RelayList,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.settings;

        let selector = Arc::new(RelaySelector::new(
            SelectorConfig {
                relay_settings: settings.relay_settings.clone(),
                obfuscation_settings: settings.obfuscation_settings.clone(),
            },
            relay_list,
        ));
        let broadcaster = EventBroadcaster::new();

        let (provider_event_tx, provider_event_rx) = mpsc::unbounded_channel();
        let (state_machine, state_machine_task) = state_machine::spawn(
            selector.clone(),
            provider,
            provider_event_rx,
            broadcaster.clone(),
            settings.lockdown_mode,
        );

        let relay_list_updater = RelayListUpdater::spawn(
            fetcher,
            selector.clone(),
            broadcaster.clone(),
            Duration::from_secs(config.daemon.relay_list_update_interval),
        );

        Ok(Daemon {
            settings,
            device_state: Arc::new(Mutex::new(DeviceState::LoggedOut)),
            selector,
            broadcaster,
            state_machine,
            state_machine_task,
            relay_list_updater,
            provider_event_tx,
        })
    }

    /// A cheap handle for driving and observing the tunnel
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            state_machine: self.state_machine.clone(),
            broadcaster: self.broadcaster.clone(),
            device_state: self.device_state.clone(),
        }
    }

    /// Subscribe to daemon events emitted from this point on
    pub fn subscribe(&self) -> EventStream {
        self.broadcaster.subscribe()
    }

    /// The current tunnel state
    pub fn tunnel_state(&self) -> TunnelState {
        self.state_machine.tunnel_state()
    }

    /// Establish a tunnel. Requires a logged-in device.
    pub fn connect(&self) -> Result<()> {
        ensure_logged_in(&self.device_state)?;
        self.state_machine.connect()
    }

    /// Tear down the tunnel, or leave the error state
    pub fn disconnect(&self) -> Result<()> {
        self.state_machine.disconnect()
    }

    /// Tear down and immediately connect again
    pub fn reconnect(&self) -> Result<()> {
        ensure_logged_in(&self.device_state)?;
        self.state_machine.reconnect()
    }

    /// The current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings.
    ///
    /// The new constraints are pushed into the relay selector, a settings
    /// event is broadcast, and the tunnel reconnects if one is up or being
    /// set up.
    pub fn set_settings(&mut self, settings: Settings) -> Result<()> {
        settings.validate()?;
        if settings == self.settings {
            return Ok(());
        }

        self.selector.set_config(SelectorConfig {
            relay_settings: settings.relay_settings.clone(),
            obfuscation_settings: settings.obfuscation_settings.clone(),
        });
        self.settings = settings.clone();
        self.broadcaster.notify(DaemonEvent::Settings(settings));
        self.state_machine.send(TunnelCommand::SettingsChanged {
            lockdown: self.settings.lockdown_mode,
        })
    }

    /// The current device state
    pub fn device_state(&self) -> DeviceState {
        self.device_state.lock().unwrap().clone()
    }

    /// Log in with an account and its registered device
    pub fn login(&self, account_and_device: AccountAndDevice) {
        self.set_device_state(
            DeviceState::LoggedIn(account_and_device),
            DeviceEventCause::LoggedIn,
        );
    }

    /// Log out, disconnecting any active tunnel
    pub fn logout(&self) -> Result<()> {
        self.set_device_state(DeviceState::LoggedOut, DeviceEventCause::LoggedOut);
        self.state_machine.disconnect()
    }

    /// Mark the device as revoked by the API. Any tunnel is blocked, since
    /// the relays will no longer accept this device's key.
    pub fn device_revoked(&self) -> Result<()> {
        self.set_device_state(DeviceState::Revoked, DeviceEventCause::Revoked);
        self.state_machine
            .send(TunnelCommand::Block(ErrorStateCause::AuthFailed(Some(
                AuthFailedError::InvalidAccount,
            ))))
    }

    fn set_device_state(&self, new_state: DeviceState, cause: DeviceEventCause) {
        *self.device_state.lock().unwrap() = new_state.clone();
        self.broadcaster
            .notify(DaemonEvent::Device(DeviceEvent { cause, new_state }));
    }

    /// Sender for tunnel provider link-state events
    pub fn provider_event_sender(&self) -> mpsc::UnboundedSender<TunnelProviderEvent> {
        self.provider_event_tx.clone()
    }

    /// The current relay list snapshot
    pub fn relay_list(&self) -> Arc<RelayList> {
        self.selector.relay_list()
    }

    /// Fetch the relay list now instead of waiting for the next tick
    pub fn update_relay_list(&self) -> Result<()> {
        self.relay_list_updater.update_now()
    }

    /// Stop all daemon services, tearing down any active tunnel
    pub async fn shutdown(self) {
        self.relay_list_updater.stop();
        let _ = self.state_machine.send(TunnelCommand::Shutdown);
        if let Err(error) = self.state_machine_task.await {
            log::error!("tunnel state machine task failed: {error}");
        }
    }
}

/// Cloneable handle exposing the tunnel operations of a running [`Daemon`]
#[derive(Clone)]
pub struct DaemonHandle {
    state_machine: StateMachineHandle,
    broadcaster: EventBroadcaster,
    device_state: Arc<Mutex<DeviceState>>,
}

impl DaemonHandle {
    /// Establish a tunnel. Requires a logged-in device.
    pub fn connect(&self) -> Result<()> {
        ensure_logged_in(&self.device_state)?;
        self.state_machine.connect()
    }

    /// Tear down the tunnel, or leave the error state
    pub fn disconnect(&self) -> Result<()> {
        self.state_machine.disconnect()
    }

    /// Tear down and immediately connect again
    pub fn reconnect(&self) -> Result<()> {
        ensure_logged_in(&self.device_state)?;
        self.state_machine.reconnect()
    }

    /// The current device state
    pub fn device_state(&self) -> DeviceState {
        self.device_state.lock().unwrap().clone()
    }

    /// The current tunnel state
    pub fn tunnel_state(&self) -> TunnelState {
        self.state_machine.tunnel_state()
    }

    /// Subscribe to daemon events emitted from this point on
    pub fn subscribe(&self) -> EventStream {
        self.broadcaster.subscribe()
    }
}

fn ensure_logged_in(device_state: &Mutex<DeviceState>) -> Result<()> {
    if device_state.lock().unwrap().is_logged_in() {
        Ok(())
    } else {
        Err(Error::NotLoggedIn)
    }
}
