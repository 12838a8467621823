//! Obfuscation negotiation
//!
//! Given the user's obfuscation settings and the relay picked for the first
//! hop, decide which wire-level wrapper (if any) the tunnel should run
//! through. An explicitly selected wrapper fails the connect attempt when the
//! relay does not support it; `Auto` walks a fixed preference order and uses
//! the connect retry counter to rotate through the surviving candidates, so
//! an unreachable wrapper is abandoned on the next attempt.

use std::net::{IpAddr, SocketAddr};

use veil_types::obfuscation::{
    ObfuscationInfo, ObfuscationSettings, ObfuscationType, SelectedObfuscation,
};
use veil_types::relay_list::Relay;
use veil_types::states::IpVersion;
use veil_types::Constraint;

use crate::Error;

/// TCP ports relays accept UDP-over-TCP traffic on
pub const UDP2TCP_PORTS: [u16; 2] = [80, 5001];

/// Default port for Shadowsocks-wrapped traffic
pub const DEFAULT_SHADOWSOCKS_PORT: u16 = 443;

/// Port for QUIC-wrapped traffic
pub const QUIC_PORT: u16 = 443;

/// Auto mode preference order. `None` is a direct, unwrapped connection.
const AUTO_CANDIDATES: [Option<ObfuscationType>; 4] = [
    None,
    Some(ObfuscationType::Udp2Tcp),
    Some(ObfuscationType::Shadowsocks),
    Some(ObfuscationType::Quic),
];

/// A fully resolved obfuscation wrapper for one connect attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ObfuscatorConfig {
    /// Wrap the tunnel in a TCP stream to this endpoint
    Udp2Tcp { endpoint: SocketAddr },
    /// Wrap the tunnel in Shadowsocks to this endpoint
    Shadowsocks { endpoint: SocketAddr },
    /// Wrap the tunnel in a QUIC connection
    Quic {
        endpoint: SocketAddr,
        /// TLS hostname to present
        domain: String,
        /// Authentication token for the proxy
        token: String,
    },
    /// Lightweight WireGuard obfuscation on the plain endpoint
    Lwo { endpoint: SocketAddr },
}

impl ObfuscatorConfig {
    /// The wrapper type and endpoint, for display
    pub fn info(&self) -> ObfuscationInfo {
        match self {
            ObfuscatorConfig::Udp2Tcp { endpoint } => ObfuscationInfo {
                obfuscation_type: ObfuscationType::Udp2Tcp,
                endpoint: *endpoint,
            },
            ObfuscatorConfig::Shadowsocks { endpoint } => ObfuscationInfo {
                obfuscation_type: ObfuscationType::Shadowsocks,
                endpoint: *endpoint,
            },
            ObfuscatorConfig::Quic { endpoint, .. } => ObfuscationInfo {
                obfuscation_type: ObfuscationType::Quic,
                endpoint: *endpoint,
            },
            ObfuscatorConfig::Lwo { endpoint } => ObfuscationInfo {
                obfuscation_type: ObfuscationType::Lwo,
                endpoint: *endpoint,
            },
        }
    }
}

/// Decide the obfuscation wrapper for a connect attempt.
///
/// `relay` is the first hop (the entry relay for multihop), `endpoint` the
/// plain WireGuard endpoint that was resolved for it, and `retry_attempt`
/// the number of failed attempts since the last explicit connect command.
pub fn select_obfuscator(
    settings: &ObfuscationSettings,
    ip_version: Constraint<IpVersion>,
    relay: &Relay,
    endpoint: SocketAddr,
    retry_attempt: usize,
) -> Result<Option<ObfuscatorConfig>, Error> {
    match settings.selected_obfuscation {
        // `WireguardPort` only forces the port of the plain endpoint, which
        // is handled during endpoint resolution.
        SelectedObfuscation::Off | SelectedObfuscation::WireguardPort => Ok(None),
        SelectedObfuscation::Udp2Tcp => {
            Ok(Some(udp2tcp_config(settings, endpoint, retry_attempt)))
        }
        SelectedObfuscation::Shadowsocks => {
            Ok(Some(shadowsocks_config(settings, ip_version, relay, endpoint)))
        }
        SelectedObfuscation::Quic => quic_config(ip_version, relay)
            .map(Some)
            .ok_or(Error::UnsupportedObfuscation {
                relay: relay.hostname.clone(),
                obfuscation: SelectedObfuscation::Quic,
            }),
        SelectedObfuscation::Lwo => {
            if relay.endpoint_data.lwo {
                Ok(Some(ObfuscatorConfig::Lwo { endpoint }))
            } else {
                Err(Error::UnsupportedObfuscation {
                    relay: relay.hostname.clone(),
                    obfuscation: SelectedObfuscation::Lwo,
                })
            }
        }
        SelectedObfuscation::Auto => Ok(auto_config(settings, ip_version, relay, endpoint, retry_attempt)),
    }
}

/// Walk the auto preference order, skipping wrappers the relay does not
/// advertise, and rotate through the survivors by retry attempt.
fn auto_config(
    settings: &ObfuscationSettings,
    ip_version: Constraint<IpVersion>,
    relay: &Relay,
    endpoint: SocketAddr,
    retry_attempt: usize,
) -> Option<ObfuscatorConfig> {
    let supported: Vec<Option<ObfuscationType>> = AUTO_CANDIDATES
        .into_iter()
        .filter(|candidate| match candidate {
            None | Some(ObfuscationType::Udp2Tcp) | Some(ObfuscationType::Shadowsocks) => true,
            Some(ObfuscationType::Quic) => relay.endpoint_data.quic.is_some(),
            Some(ObfuscationType::Lwo) => relay.endpoint_data.lwo,
        })
        .collect();

    // Direct is always supported, so the list is never empty
    let candidate = supported[retry_attempt % supported.len()];
    match candidate {
        None => None,
        Some(ObfuscationType::Udp2Tcp) => Some(udp2tcp_config(settings, endpoint, retry_attempt)),
        Some(ObfuscationType::Shadowsocks) => {
            Some(shadowsocks_config(settings, ip_version, relay, endpoint))
        }
        Some(ObfuscationType::Quic) => quic_config(ip_version, relay),
        Some(ObfuscationType::Lwo) => Some(ObfuscatorConfig::Lwo { endpoint }),
    }
}

fn udp2tcp_config(
    settings: &ObfuscationSettings,
    endpoint: SocketAddr,
    retry_attempt: usize,
) -> ObfuscatorConfig {
    let port = match settings.udp2tcp.port {
        Constraint::Only(port) => port,
        Constraint::Any => UDP2TCP_PORTS[retry_attempt % UDP2TCP_PORTS.len()],
    };
    ObfuscatorConfig::Udp2Tcp {
        endpoint: SocketAddr::new(endpoint.ip(), port),
    }
}

fn shadowsocks_config(
    settings: &ObfuscationSettings,
    ip_version: Constraint<IpVersion>,
    relay: &Relay,
    endpoint: SocketAddr,
) -> ObfuscatorConfig {
    let port = match settings.shadowsocks.port {
        Constraint::Only(port) => port,
        Constraint::Any => DEFAULT_SHADOWSOCKS_PORT,
    };
    // Prefer a dedicated Shadowsocks address when the relay advertises one
    let ip = relay
        .endpoint_data
        .shadowsocks_extra_addr_in
        .iter()
        .find(|addr| matches_ip_version(addr, ip_version))
        .copied()
        .unwrap_or_else(|| endpoint.ip());
    ObfuscatorConfig::Shadowsocks {
        endpoint: SocketAddr::new(ip, port),
    }
}

fn quic_config(ip_version: Constraint<IpVersion>, relay: &Relay) -> Option<ObfuscatorConfig> {
    let quic = relay.endpoint_data.quic.as_ref()?;
    let ip = quic
        .addr_in
        .iter()
        .find(|addr| matches_ip_version(addr, ip_version))
        .copied()?;
    Some(ObfuscatorConfig::Quic {
        endpoint: SocketAddr::new(ip, QUIC_PORT),
        domain: quic.domain.clone(),
        token: quic.token.clone(),
    })
}

fn matches_ip_version(addr: &IpAddr, ip_version: Constraint<IpVersion>) -> bool {
    match ip_version {
        Constraint::Any => true,
        Constraint::Only(IpVersion::V4) => addr.is_ipv4(),
        Constraint::Only(IpVersion::V6) => addr.is_ipv6(),
    }
}
