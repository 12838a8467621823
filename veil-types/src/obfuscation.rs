//! Obfuscation settings
//!
//! Obfuscation wraps the tunnel's traffic in another protocol so that it does
//! not look like VPN traffic on the wire. The user either forces one wrapper,
//! disables wrapping entirely, or leaves the choice to the daemon (`Auto`).

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::constraints::Constraint;

/// Which obfuscation wrapper the user has selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedObfuscation {
    /// Let the daemon pick a working wrapper, preferring none
    #[default]
    Auto,
    /// Never use obfuscation
    Off,
    /// Plain WireGuard on a specific port
    WireguardPort,
    /// Wrap the tunnel in a TCP stream
    Udp2Tcp,
    /// Wrap the tunnel in Shadowsocks
    Shadowsocks,
    /// Wrap the tunnel in a QUIC connection
    Quic,
    /// Lightweight WireGuard obfuscation
    Lwo,
}

impl fmt::Display for SelectedObfuscation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectedObfuscation::Auto => write!(f, "auto"),
            SelectedObfuscation::Off => write!(f, "off"),
            SelectedObfuscation::WireguardPort => write!(f, "wireguard port"),
            SelectedObfuscation::Udp2Tcp => write!(f, "udp2tcp"),
            SelectedObfuscation::Shadowsocks => write!(f, "shadowsocks"),
            SelectedObfuscation::Quic => write!(f, "quic"),
            SelectedObfuscation::Lwo => write!(f, "lwo"),
        }
    }
}

/// Settings for the UDP-over-TCP wrapper
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Udp2TcpSettings {
    /// TCP port to connect to on the relay
    pub port: Constraint<u16>,
}

/// Settings for the Shadowsocks wrapper
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowsocksSettings {
    /// Port to connect to on the relay
    pub port: Constraint<u16>,
}

/// Settings for plain WireGuard on a forced port
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardPortSettings {
    /// Port to connect to on the relay
    pub port: Constraint<u16>,
}

/// All obfuscation settings.
///
/// Only the sub-settings matching `selected_obfuscation` are consulted when
/// negotiating a connection; the others are kept so that switching modes
/// back and forth preserves per-mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationSettings {
    /// The selected wrapper
    pub selected_obfuscation: SelectedObfuscation,
    /// UDP-over-TCP parameters
    pub udp2tcp: Udp2TcpSettings,
    /// Shadowsocks parameters
    pub shadowsocks: ShadowsocksSettings,
    /// Forced WireGuard port parameters
    pub wireguard_port: WireguardPortSettings,
}

/// The wrapper a session actually runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObfuscationType {
    Udp2Tcp,
    Shadowsocks,
    Quic,
    Lwo,
}

impl fmt::Display for ObfuscationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObfuscationType::Udp2Tcp => write!(f, "udp2tcp"),
            ObfuscationType::Shadowsocks => write!(f, "shadowsocks"),
            ObfuscationType::Quic => write!(f, "quic"),
            ObfuscationType::Lwo => write!(f, "lwo"),
        }
    }
}

/// What obfuscation ended up active for a session, for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObfuscationInfo {
    /// The active wrapper
    pub obfuscation_type: ObfuscationType,
    /// The wrapper's remote endpoint
    pub endpoint: SocketAddr,
}
