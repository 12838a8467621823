//! The tunnel provider seam
//!
//! The daemon core never talks to the platform's networking stack directly.
//! It hands fully resolved connection parameters to a [`TunnelProvider`] and
//! reacts to the link-state events the provider reports back. Platform
//! drivers (kernel WireGuard, userspace implementations) live behind this
//! trait; tests use a scripted implementation.

use async_trait::async_trait;
use ipnet::IpNet;

use veil_relay_selector::obfuscation::ObfuscatorConfig;
use veil_relay_selector::SelectedConfig;
use veil_types::states::{
    AuthFailedError, ErrorStateCause, FirewallPolicyError, TunnelMetadata,
};

/// Everything a provider needs to bring a tunnel up
#[derive(Debug, Clone)]
pub struct TunnelParameters {
    /// The resolved relay(s), endpoint and obfuscation wrapper
    pub config: SelectedConfig,
    /// Networks routed through the tunnel. Empty means all traffic.
    pub allowed_ips: Vec<IpNet>,
    /// Enable DAITA traffic shaping for this session
    pub daita: bool,
    /// Use a quantum-resistant key exchange
    pub quantum_resistant: bool,
}

impl TunnelParameters {
    /// The obfuscation wrapper to apply, if any
    pub fn obfuscator(&self) -> Option<&ObfuscatorConfig> {
        self.config.obfuscator.as_ref()
    }
}

/// Why a tunnel could not be established
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstablishError {
    /// The relay rejected our credentials
    #[error("authentication failed")]
    AuthFailed(Option<AuthFailedError>),

    /// The host has no route to the relay
    #[error("the host appears to be offline")]
    Offline,

    /// Creating the tunnel network device failed
    #[error("failed to create tunnel device")]
    CreateTunnelDevice {
        /// Platform error code, if reported
        os_error: Option<i32>,
    },

    /// The tunnel process/driver failed to start
    #[error("failed to start tunnel: {0}")]
    Start(String),

    /// Configuring DNS for the tunnel failed
    #[error("failed to set DNS")]
    SetDns,

    /// Applying the firewall policy failed
    #[error("failed to apply firewall policy")]
    SetFirewallPolicy(FirewallPolicyError),

    /// The tunnel requires IPv6 but the host has none
    #[error("IPv6 is unavailable")]
    Ipv6Unavailable,
}

impl EstablishError {
    /// The error state cause this failure maps to
    pub fn to_cause(&self) -> ErrorStateCause {
        match self {
            EstablishError::AuthFailed(reason) => ErrorStateCause::AuthFailed(*reason),
            EstablishError::Offline => ErrorStateCause::IsOffline,
            EstablishError::CreateTunnelDevice { os_error } => {
                ErrorStateCause::CreateTunnelDevice {
                    os_error: *os_error,
                }
            }
            EstablishError::Start(_) => ErrorStateCause::StartTunnelError,
            EstablishError::SetDns => ErrorStateCause::SetDnsError,
            EstablishError::SetFirewallPolicy(error) => {
                ErrorStateCause::SetFirewallPolicyError(error.clone())
            }
            EstablishError::Ipv6Unavailable => ErrorStateCause::Ipv6Unavailable,
        }
    }
}

/// Link-state events reported by a provider while a tunnel is (or was) up
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelProviderEvent {
    /// The tunnel link went down unexpectedly
    Down,
    /// Host connectivity changed (true = online)
    ConnectivityChanged(bool),
}

/// Abstract platform tunnel driver
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Establish a tunnel with the given parameters. Returns metadata about
    /// the created interface on success.
    async fn establish(
        &self,
        parameters: TunnelParameters,
    ) -> Result<TunnelMetadata, EstablishError>;

    /// Tear down the active tunnel, if any. Must be idempotent.
    async fn tear_down(&self);
}

/// A provider that creates no real tunnel: `establish` succeeds immediately
/// with placeholder metadata. Used until a platform driver is wired in, and
/// useful for exercising the daemon end-to-end.
pub struct NullTunnelProvider;

#[async_trait]
impl TunnelProvider for NullTunnelProvider {
    async fn establish(
        &self,
        parameters: TunnelParameters,
    ) -> Result<TunnelMetadata, EstablishError> {
        log::info!(
            "pretending to establish tunnel to {}",
            parameters.config.endpoint
        );
        Ok(TunnelMetadata {
            interface: "veil0".to_owned(),
            ips: vec!["10.64.0.2".parse().expect("valid address")],
            ipv4_gateway: Some("10.64.0.1".parse().expect("valid address")),
            ipv6_gateway: None,
        })
    }

    async fn tear_down(&self) {
        log::info!("pretending to tear down tunnel");
    }
}
