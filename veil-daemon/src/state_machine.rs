//! Tunnel state machine
//!
//! The single owner of the daemon's [`TunnelState`]. Commands and tunnel
//! provider events are funneled into one mailbox and handled by one task, so
//! every transition is serialized; there is no state that can be observed
//! mid-transition.
//!
//! Connect attempts are tagged with a generation counter. Any newer command
//! bumps the generation, which cancels the pending attempt: results arriving
//! for a stale generation are dropped. Transient establishment failures are
//! retried with exponential backoff up to a small number of attempts, after
//! which the machine settles in the error state. Terminal failures (such as
//! authentication errors) enter the error state immediately and wait for the
//! user.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use veil_relay_selector::{RelaySelector, SelectedConfig, SelectedRelays};
use veil_types::constraints::{RelaySettings, WireguardConstraints};
use veil_types::obfuscation::ObfuscationType;
use veil_types::states::{
    ActionAfterDisconnect, ErrorState, ErrorStateCause, FeatureIndicator, FeatureIndicators,
    TunnelEndpoint, TunnelMetadata, TunnelState,
};

use crate::error::{Error, Result};
use crate::event::{DaemonEvent, EventBroadcaster};
use crate::tunnel::{EstablishError, TunnelParameters, TunnelProvider, TunnelProviderEvent};

/// Consecutive failed attempts before giving up and entering the error state
pub const MAX_CONNECT_ATTEMPTS: usize = 3;

/// First retry delay; doubles per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the retry delay
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Commands accepted by the state machine
#[derive(Debug)]
pub enum TunnelCommand {
    /// Establish a tunnel. Restarts the attempt if one is in progress.
    Connect,
    /// Tear down the tunnel, or leave the error state
    Disconnect,
    /// Tear down and immediately connect again
    Reconnect,
    /// The settings changed. Reconnects if a tunnel is up or being set up.
    SettingsChanged {
        /// New lockdown-mode flag
        lockdown: bool,
    },
    /// Enter the error state with the given cause, tearing down any tunnel
    Block(ErrorStateCause),
    /// Stop the state machine
    Shutdown,
}

/// Results reported back into the mailbox by spawned work
enum InternalEvent {
    EstablishResult {
        generation: u64,
        result: std::result::Result<TunnelMetadata, EstablishError>,
    },
    RetryTimeout {
        generation: u64,
    },
}

/// Handle used to drive and observe the state machine
#[derive(Clone)]
pub struct StateMachineHandle {
    command_tx: mpsc::UnboundedSender<TunnelCommand>,
    state_rx: watch::Receiver<TunnelState>,
}

impl StateMachineHandle {
    /// Send a command to the state machine
    pub fn send(&self, command: TunnelCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::StateMachineDown)
    }

    /// Request a connection
    pub fn connect(&self) -> Result<()> {
        self.send(TunnelCommand::Connect)
    }

    /// Request a disconnect
    pub fn disconnect(&self) -> Result<()> {
        self.send(TunnelCommand::Disconnect)
    }

    /// Request a reconnect
    pub fn reconnect(&self) -> Result<()> {
        self.send(TunnelCommand::Reconnect)
    }

    /// The current tunnel state
    pub fn tunnel_state(&self) -> TunnelState {
        self.state_rx.borrow().clone()
    }

    /// A watch receiver following every state change
    pub fn state_watcher(&self) -> watch::Receiver<TunnelState> {
        self.state_rx.clone()
    }
}

/// Spawn the state machine task.
///
/// `provider_events` carries link-state notifications from the tunnel
/// provider. The returned join handle completes after a
/// [`TunnelCommand::Shutdown`] or once all command senders are dropped.
pub fn spawn(
    selector: Arc<RelaySelector>,
    provider: Arc<dyn TunnelProvider>,
    provider_events: mpsc::UnboundedReceiver<TunnelProviderEvent>,
    broadcaster: EventBroadcaster,
    lockdown: bool,
) -> (StateMachineHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let initial = TunnelState::Disconnected {
        location: None,
        locked_down: lockdown,
    };
    let (state_tx, state_rx) = watch::channel(initial.clone());

    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let machine = TunnelStateMachine {
        commands: command_rx,
        provider_events,
        internal_rx,
        internal_tx,
        selector,
        provider,
        broadcaster,
        state_tx,
        state: initial,
        generation: 0,
        retry_attempt: 0,
        lockdown,
        pending_endpoint: None,
    };
    let task = tokio::spawn(machine.run());

    (
        StateMachineHandle {
            command_tx,
            state_rx,
        },
        task,
    )
}

struct TunnelStateMachine {
    commands: mpsc::UnboundedReceiver<TunnelCommand>,
    provider_events: mpsc::UnboundedReceiver<TunnelProviderEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    selector: Arc<RelaySelector>,
    provider: Arc<dyn TunnelProvider>,
    broadcaster: EventBroadcaster,
    state_tx: watch::Sender<TunnelState>,
    state: TunnelState,
    /// Generation of the most recent connect attempt. Results and timeouts
    /// tagged with an older generation are stale and ignored.
    generation: u64,
    /// Failed attempts since the last explicit connect/reconnect command
    retry_attempt: usize,
    lockdown: bool,
    /// Endpoint and features of the attempt currently connecting
    pending_endpoint: Option<(TunnelEndpoint, FeatureIndicators)>,
}

impl TunnelStateMachine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TunnelCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.provider_events.recv() => {
                    self.handle_provider_event(event).await;
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal_event(event).await;
                }
            }
        }

        // Leave no tunnel behind on shutdown
        if !self.state.is_disconnected() {
            self.provider.tear_down().await;
        }
        log::debug!("tunnel state machine exited");
    }

    async fn handle_command(&mut self, command: TunnelCommand) {
        match command {
            TunnelCommand::Connect => match self.state {
                TunnelState::Disconnected { .. } | TunnelState::Error(_) => {
                    self.retry_attempt = 0;
                    self.start_connect();
                }
                TunnelState::Connecting { .. } | TunnelState::Connected { .. } => {
                    // A fresh connect supersedes whatever is in flight
                    self.retry_attempt = 0;
                    self.disconnect_with(ActionAfterDisconnect::Reconnect).await;
                }
                TunnelState::Disconnecting(_) => {}
            },
            TunnelCommand::Disconnect => match self.state {
                TunnelState::Connecting { .. } | TunnelState::Connected { .. } => {
                    self.disconnect_with(self.idle_action()).await;
                }
                TunnelState::Error(_) => {
                    self.set_state(self.disconnected_state());
                }
                TunnelState::Disconnected { .. } | TunnelState::Disconnecting(_) => {}
            },
            TunnelCommand::Reconnect => match self.state {
                TunnelState::Connecting { .. } | TunnelState::Connected { .. } => {
                    self.retry_attempt = 0;
                    self.disconnect_with(ActionAfterDisconnect::Reconnect).await;
                }
                TunnelState::Disconnected { .. } | TunnelState::Error(_) => {
                    self.retry_attempt = 0;
                    self.start_connect();
                }
                TunnelState::Disconnecting(_) => {}
            },
            TunnelCommand::SettingsChanged { lockdown } => {
                self.lockdown = lockdown;
                match self.state {
                    // New constraints take effect by reconnecting
                    TunnelState::Connecting { .. } | TunnelState::Connected { .. } => {
                        self.retry_attempt = 0;
                        self.disconnect_with(ActionAfterDisconnect::Reconnect).await;
                    }
                    TunnelState::Disconnected { .. } => {
                        // Only the lockdown flag can change what this state shows
                        self.set_state(self.disconnected_state());
                    }
                    TunnelState::Error(_) | TunnelState::Disconnecting(_) => {}
                }
            }
            TunnelCommand::Block(cause) => {
                if !self.state.is_disconnected() {
                    self.provider.tear_down().await;
                }
                self.generation += 1;
                self.enter_error_state(cause);
            }
            // Handled by the run loop before dispatching here
            TunnelCommand::Shutdown => {}
        }
    }

    async fn handle_provider_event(&mut self, event: TunnelProviderEvent) {
        match event {
            TunnelProviderEvent::Down => {
                if self.state.is_connected() {
                    log::warn!("tunnel link went down, reconnecting");
                    self.disconnect_with(ActionAfterDisconnect::Reconnect).await;
                }
            }
            TunnelProviderEvent::ConnectivityChanged(online) => {
                let waiting_for_connectivity = matches!(
                    &self.state,
                    TunnelState::Error(error_state)
                        if *error_state.cause() == ErrorStateCause::IsOffline
                );
                if online && waiting_for_connectivity {
                    log::info!("connectivity restored, reconnecting");
                    self.retry_attempt = 0;
                    self.start_connect();
                }
            }
        }
    }

    async fn handle_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::EstablishResult { generation, result } => {
                if generation != self.generation {
                    log::debug!("dropping stale establish result");
                    return;
                }
                match result {
                    Ok(metadata) => self.handle_established(metadata),
                    Err(error) => self.handle_establish_failure(error).await,
                }
            }
            InternalEvent::RetryTimeout { generation } => {
                if generation == self.generation {
                    self.start_connect();
                }
            }
        }
    }

    /// Select tunnel parameters and kick off an establish attempt
    fn start_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;

        let selected = match self.selector.get_relay(self.retry_attempt) {
            Ok(selected) => selected,
            Err(error) => {
                log::error!("failed to generate tunnel parameters: {error}");
                self.enter_error_state(ErrorStateCause::TunnelParameterError(
                    error.to_generation_error(),
                ));
                return;
            }
        };

        let endpoint = selected.tunnel_endpoint();
        let feature_indicators = self.feature_indicators(&selected);
        self.pending_endpoint = Some((endpoint.clone(), feature_indicators.clone()));
        self.set_state(TunnelState::Connecting {
            endpoint,
            feature_indicators,
        });

        let constraints = self.wireguard_constraints();
        let parameters = TunnelParameters {
            config: selected,
            allowed_ips: constraints.allowed_ips,
            daita: constraints.daita,
            quantum_resistant: constraints.quantum_resistant,
        };

        let provider = self.provider.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = provider.establish(parameters).await;
            let _ = internal_tx.send(InternalEvent::EstablishResult { generation, result });
        });
    }

    fn handle_established(&mut self, metadata: TunnelMetadata) {
        let Some((endpoint, feature_indicators)) = self.pending_endpoint.take() else {
            log::error!("established a tunnel without a pending attempt");
            return;
        };
        self.retry_attempt = 0;
        self.set_state(TunnelState::Connected {
            endpoint,
            metadata,
            feature_indicators,
        });
    }

    async fn handle_establish_failure(&mut self, error: EstablishError) {
        let cause = error.to_cause();
        log::warn!("connect attempt failed: {error}");

        if cause.prevents_automatic_retry() {
            self.enter_error_state(cause);
            return;
        }

        self.retry_attempt += 1;
        if self.retry_attempt >= MAX_CONNECT_ATTEMPTS {
            log::error!("giving up after {} attempts", self.retry_attempt);
            self.enter_error_state(cause);
            return;
        }

        let delay = retry_delay(self.retry_attempt);
        log::info!(
            "retrying in {}s (attempt {})",
            delay.as_secs(),
            self.retry_attempt
        );
        let generation = self.generation;
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal_tx.send(InternalEvent::RetryTimeout { generation });
        });
    }

    /// Tear the tunnel down, then either rest or reconnect
    async fn disconnect_with(&mut self, action: ActionAfterDisconnect) {
        // Cancel any in-flight attempt before tearing down
        self.generation += 1;
        self.pending_endpoint = None;
        self.set_state(TunnelState::Disconnecting(action));
        self.provider.tear_down().await;

        match action {
            ActionAfterDisconnect::Nothing => self.set_state(self.disconnected_state()),
            ActionAfterDisconnect::Block => self.set_state(TunnelState::Disconnected {
                location: None,
                locked_down: true,
            }),
            ActionAfterDisconnect::Reconnect => self.start_connect(),
        }
    }

    fn enter_error_state(&mut self, cause: ErrorStateCause) {
        self.pending_endpoint = None;
        self.set_state(TunnelState::Error(ErrorState::new(cause)));
    }

    fn set_state(&mut self, new_state: TunnelState) {
        if new_state == self.state {
            return;
        }
        log::info!("tunnel state: {} -> {}", self.state, new_state);
        self.state = new_state.clone();
        self.state_tx.send_replace(new_state.clone());
        self.broadcaster.notify(DaemonEvent::TunnelState(new_state));
    }

    fn disconnected_state(&self) -> TunnelState {
        TunnelState::Disconnected {
            location: None,
            locked_down: self.lockdown,
        }
    }

    /// What a plain disconnect should do afterwards, honoring lockdown mode
    fn idle_action(&self) -> ActionAfterDisconnect {
        if self.lockdown {
            ActionAfterDisconnect::Block
        } else {
            ActionAfterDisconnect::Nothing
        }
    }

    fn wireguard_constraints(&self) -> WireguardConstraints {
        match self.selector.config().relay_settings {
            RelaySettings::Normal(constraints) => constraints.wireguard_constraints,
            RelaySettings::Custom(_) => WireguardConstraints::default(),
        }
    }

    /// Which optional features will be active for a session using `selected`
    fn feature_indicators(&self, selected: &SelectedConfig) -> FeatureIndicators {
        let constraints = self.wireguard_constraints();
        let mut indicators = Vec::new();

        if matches!(selected.relays, SelectedRelays::Multihop { .. }) {
            indicators.push(FeatureIndicator::Multihop);
        }
        if constraints.daita {
            indicators.push(FeatureIndicator::Daita);
        }
        if constraints.quantum_resistant {
            indicators.push(FeatureIndicator::QuantumResistance);
        }
        if let Some(obfuscator) = &selected.obfuscator {
            indicators.push(match obfuscator.info().obfuscation_type {
                ObfuscationType::Udp2Tcp => FeatureIndicator::Udp2Tcp,
                ObfuscationType::Shadowsocks => FeatureIndicator::Shadowsocks,
                ObfuscationType::Quic => FeatureIndicator::Quic,
                ObfuscationType::Lwo => FeatureIndicator::Lwo,
            });
        }
        if self.lockdown {
            indicators.push(FeatureIndicator::LockdownMode);
        }

        indicators.into_iter().collect()
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at [`RETRY_MAX_DELAY`]
fn retry_delay(attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    RETRY_BASE_DELAY
        .saturating_mul(1 << exponent)
        .min(RETRY_MAX_DELAY)
}
