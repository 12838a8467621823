//! Tunnel state model
//!
//! The daemon is always in exactly one [`TunnelState`]. State transitions are
//! driven by the tunnel state machine; everything here is the passive data
//! that gets broadcast to subscribers on every transition.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::obfuscation::ObfuscationInfo;
use crate::relay_list::Location;

/// IP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpVersion {
    V4,
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// The overall tunnel connection state.
///
/// Exactly one variant is ever active; the enum representation makes the
/// "single populated branch" invariant structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TunnelState {
    /// No tunnel is running
    Disconnected {
        /// Our apparent location, if known
        location: Option<Location>,
        /// Whether non-tunnel traffic is blocked while disconnected
        locked_down: bool,
    },
    /// A connect attempt is in progress
    Connecting {
        /// The endpoint being connected to
        endpoint: TunnelEndpoint,
        /// Features that will be active for this session
        feature_indicators: FeatureIndicators,
    },
    /// The tunnel is up
    Connected {
        /// The endpoint we are connected to
        endpoint: TunnelEndpoint,
        /// The tunnel interface created for this session
        metadata: TunnelMetadata,
        /// Features active for this session
        feature_indicators: FeatureIndicators,
    },
    /// The tunnel is being torn down
    Disconnecting(ActionAfterDisconnect),
    /// The tunnel failed and the daemon is blocking or waiting
    Error(ErrorState),
}

impl TunnelState {
    /// Returns true if the tunnel is up
    pub fn is_connected(&self) -> bool {
        matches!(self, TunnelState::Connected { .. })
    }

    /// Returns true if no tunnel is running and no attempt is in progress
    pub fn is_disconnected(&self) -> bool {
        matches!(self, TunnelState::Disconnected { .. })
    }

    /// Returns true if the daemon is in the error state
    pub fn is_in_error_state(&self) -> bool {
        matches!(self, TunnelState::Error(..))
    }

    /// Returns true if a connection is being established or torn down
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TunnelState::Connecting { .. } | TunnelState::Disconnecting(..)
        )
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Disconnected { locked_down, .. } => {
                if *locked_down {
                    write!(f, "Disconnected (blocked)")
                } else {
                    write!(f, "Disconnected")
                }
            }
            TunnelState::Connecting { endpoint, .. } => {
                write!(f, "Connecting to {}", endpoint.exit.hostname)
            }
            TunnelState::Connected { endpoint, .. } => {
                write!(f, "Connected to {}", endpoint.exit.hostname)
            }
            TunnelState::Disconnecting(_) => write!(f, "Disconnecting"),
            TunnelState::Error(error_state) => write!(f, "Error: {}", error_state.cause()),
        }
    }
}

/// What the state machine should do once the tunnel is fully torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionAfterDisconnect {
    /// Return to the disconnected state
    Nothing,
    /// Block all traffic and return to the disconnected state
    Block,
    /// Immediately start a new connect attempt
    Reconnect,
}

/// The remote endpoint(s) a session runs through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    /// The exit relay
    pub exit: RelayEndpoint,
    /// The entry relay, when multihop is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<RelayEndpoint>,
    /// The obfuscation wrapper in use, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfuscation: Option<ObfuscationInfo>,
}

/// One resolved relay endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    /// Relay hostname
    pub hostname: String,
    /// Resolved socket address to connect to
    pub address: SocketAddr,
    /// Where the relay is located
    pub location: Location,
}

/// Details about the local tunnel interface of an established session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelMetadata {
    /// Name of the tunnel interface
    pub interface: String,
    /// Addresses assigned to the interface
    pub ips: Vec<IpAddr>,
    /// IPv4 gateway inside the tunnel
    pub ipv4_gateway: Option<Ipv4Addr>,
    /// IPv6 gateway inside the tunnel
    pub ipv6_gateway: Option<Ipv6Addr>,
}

/// A feature that is active for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureIndicator {
    Multihop,
    Daita,
    QuantumResistance,
    Udp2Tcp,
    Shadowsocks,
    Quic,
    Lwo,
    LockdownMode,
}

impl fmt::Display for FeatureIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeatureIndicator::Multihop => "Multihop",
            FeatureIndicator::Daita => "DAITA",
            FeatureIndicator::QuantumResistance => "Quantum resistance",
            FeatureIndicator::Udp2Tcp => "UDP-over-TCP",
            FeatureIndicator::Shadowsocks => "Shadowsocks",
            FeatureIndicator::Quic => "QUIC",
            FeatureIndicator::Lwo => "LWO",
            FeatureIndicator::LockdownMode => "Lockdown mode",
        };
        write!(f, "{label}")
    }
}

/// The set of features active for a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureIndicators(BTreeSet<FeatureIndicator>);

impl FeatureIndicators {
    /// Returns true if the given feature is active
    pub fn contains(&self, indicator: FeatureIndicator) -> bool {
        self.0.contains(&indicator)
    }

    /// Iterate over active features in a stable order
    pub fn iter(&self) -> impl Iterator<Item = &FeatureIndicator> {
        self.0.iter()
    }

    /// Returns true if no optional feature is active
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<FeatureIndicator> for FeatureIndicators {
    fn from_iter<T: IntoIterator<Item = FeatureIndicator>>(iter: T) -> Self {
        FeatureIndicators(iter.into_iter().collect())
    }
}

/// The error state entered when a tunnel cannot be established or the
/// daemon must block traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    cause: ErrorStateCause,
    /// Set when the firewall policy that should isolate the host while in
    /// the error state could not be applied
    block_failure: Option<FirewallPolicyError>,
}

impl ErrorState {
    /// Create an error state where blocking succeeded
    pub fn new(cause: ErrorStateCause) -> Self {
        ErrorState {
            cause,
            block_failure: None,
        }
    }

    /// Create an error state where applying the blocking policy also failed
    pub fn new_blocking_failed(cause: ErrorStateCause, block_failure: FirewallPolicyError) -> Self {
        ErrorState {
            cause,
            block_failure: Some(block_failure),
        }
    }

    /// What caused the error state
    pub fn cause(&self) -> &ErrorStateCause {
        &self.cause
    }

    /// Returns true if traffic is actually being blocked
    pub fn is_blocking(&self) -> bool {
        self.block_failure.is_none()
    }

    /// The error that prevented blocking, if any
    pub fn block_failure(&self) -> Option<&FirewallPolicyError> {
        self.block_failure.as_ref()
    }
}

/// Why the daemon entered the error state.
///
/// Cause-specific details live inside the variant, so a cause can never be
/// paired with the wrong payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", content = "details", rename_all = "snake_case")]
pub enum ErrorStateCause {
    /// Authentication with the relay failed
    AuthFailed(Option<AuthFailedError>),
    /// The tunnel requires IPv6 but the host has no IPv6 connectivity
    Ipv6Unavailable,
    /// Applying the firewall policy failed
    SetFirewallPolicyError(FirewallPolicyError),
    /// Configuring DNS for the tunnel failed
    SetDnsError,
    /// Starting the tunnel failed
    StartTunnelError,
    /// Creating the tunnel network device failed
    CreateTunnelDevice {
        /// Platform error code, if one was reported
        os_error: Option<i32>,
    },
    /// No usable tunnel parameters could be generated
    TunnelParameterError(GenerationError),
    /// The host appears to have no internet connectivity
    IsOffline,
    /// The platform VPN service has not been prepared/authorized
    NotPrepared,
    /// Another application holds the platform's always-on VPN slot
    OtherAlwaysOnApp {
        /// Name of the conflicting application
        app_name: String,
    },
    /// A legacy always-on VPN configuration is active
    OtherLegacyAlwaysOnVpn,
    /// The configured custom DNS servers are unusable
    InvalidDnsServers(Vec<IpAddr>),
    /// Configuring split tunneling failed
    SplitTunnelError,
    /// The daemon lacks full-disk permissions required for split tunneling
    NeedFullDiskPermissions,
}

impl ErrorStateCause {
    /// Returns true if this cause is terminal: the daemon should stay in the
    /// error state until the user intervenes, rather than retrying.
    pub fn prevents_automatic_retry(&self) -> bool {
        match self {
            ErrorStateCause::AuthFailed(_)
            | ErrorStateCause::TunnelParameterError(_)
            | ErrorStateCause::InvalidDnsServers(_)
            | ErrorStateCause::NotPrepared
            | ErrorStateCause::OtherAlwaysOnApp { .. }
            | ErrorStateCause::OtherLegacyAlwaysOnVpn
            | ErrorStateCause::SplitTunnelError
            | ErrorStateCause::NeedFullDiskPermissions => true,
            ErrorStateCause::Ipv6Unavailable
            | ErrorStateCause::SetFirewallPolicyError(_)
            | ErrorStateCause::SetDnsError
            | ErrorStateCause::StartTunnelError
            | ErrorStateCause::CreateTunnelDevice { .. }
            | ErrorStateCause::IsOffline => false,
        }
    }
}

impl fmt::Display for ErrorStateCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStateCause::AuthFailed(Some(error)) => {
                write!(f, "authentication failed: {error}")
            }
            ErrorStateCause::AuthFailed(None) => write!(f, "authentication failed"),
            ErrorStateCause::Ipv6Unavailable => write!(f, "IPv6 is unavailable"),
            ErrorStateCause::SetFirewallPolicyError(_) => {
                write!(f, "failed to apply firewall policy")
            }
            ErrorStateCause::SetDnsError => write!(f, "failed to set system DNS"),
            ErrorStateCause::StartTunnelError => write!(f, "failed to start the tunnel"),
            ErrorStateCause::CreateTunnelDevice { os_error: Some(code) } => {
                write!(f, "failed to create tunnel device (os error {code})")
            }
            ErrorStateCause::CreateTunnelDevice { os_error: None } => {
                write!(f, "failed to create tunnel device")
            }
            ErrorStateCause::TunnelParameterError(error) => {
                write!(f, "failed to generate tunnel parameters: {error}")
            }
            ErrorStateCause::IsOffline => write!(f, "the device is offline"),
            ErrorStateCause::NotPrepared => write!(f, "the VPN service is not prepared"),
            ErrorStateCause::OtherAlwaysOnApp { app_name } => {
                write!(f, "{app_name} holds the always-on VPN slot")
            }
            ErrorStateCause::OtherLegacyAlwaysOnVpn => {
                write!(f, "a legacy always-on VPN is active")
            }
            ErrorStateCause::InvalidDnsServers(servers) => {
                write!(f, "invalid DNS servers: ")?;
                let mut first = true;
                for server in servers {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{server}")?;
                    first = false;
                }
                Ok(())
            }
            ErrorStateCause::SplitTunnelError => write!(f, "failed to set up split tunneling"),
            ErrorStateCause::NeedFullDiskPermissions => {
                write!(f, "full disk access permissions are required")
            }
        }
    }
}

/// Specific reason for an authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailedError {
    #[error("the account number is invalid")]
    InvalidAccount,
    #[error("the account has no time left")]
    ExpiredAccount,
    #[error("the account has too many connected devices")]
    TooManyConnections,
    #[error("unknown authentication failure")]
    Unknown,
}

/// Failure to apply a firewall policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FirewallPolicyError {
    /// The firewall rejected the policy
    #[error("failed to apply firewall rules")]
    Generic,
    /// Another application holds a lock on the firewall
    #[error("the firewall is locked by {application}")]
    Locked {
        /// Name of the application holding the lock
        application: String,
    },
}

/// Connect-time tunnel parameter generation failure: the constraints could
/// not be satisfied against the current relay list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum GenerationError {
    #[error("no relay matches the current constraints")]
    NoMatchingRelay,
    #[error("no entry relay matches the current constraints")]
    NoMatchingEntryRelay,
    #[error("no exit relay matches the current constraints")]
    NoMatchingExitRelay,
    #[error("the selected relay does not support the selected obfuscation")]
    ObfuscationUnsupported,
}
