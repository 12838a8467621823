//! Relay selection for the Veil VPN daemon
//!
//! Resolves the user's relay constraints against the current relay list
//! snapshot on every connect attempt: filter the list down to matching
//! candidates, pick one at random weighted by the relay's selection weight
//! (two for multihop), then negotiate the obfuscation wrapper for the chosen
//! endpoint.
//!
//! The selector is deliberately synchronous; the tunnel state machine calls
//! it from inside a transition and owns cancellation.

pub mod helpers;
pub mod matcher;
pub mod obfuscation;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use veil_types::constraints::{
    Constraint, CustomTunnelEndpoint, RelayConstraints, RelaySettings, WireguardConstraints,
};
use veil_types::obfuscation::{ObfuscationSettings, SelectedObfuscation};
use veil_types::relay_list::{Relay, RelayList};
use veil_types::states::{GenerationError, IpVersion, RelayEndpoint, TunnelEndpoint};
use veil_types::DEFAULT_WIREGUARD_PORT;

use crate::matcher::RelayMatcher;
use crate::obfuscation::{select_obfuscator, ObfuscatorConfig};

/// Result type alias for selection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when resolving constraints to a relay
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No relay in the list satisfies the constraints
    #[error("no relay matches the current constraints")]
    NoMatchingRelay,

    /// No entry relay satisfies the multihop entry constraints
    #[error("no entry relay matches the current constraints")]
    NoMatchingEntryRelay,

    /// No exit relay satisfies the constraints
    #[error("no exit relay matches the current constraints")]
    NoMatchingExitRelay,

    /// The selected relay does not support the explicitly selected wrapper
    #[error("relay {relay} does not support {obfuscation} obfuscation")]
    UnsupportedObfuscation {
        /// Hostname of the selected relay
        relay: String,
        /// The wrapper the user selected
        obfuscation: SelectedObfuscation,
    },

    /// A custom endpoint host could not be used verbatim
    #[error("custom endpoint host {0} is not an IP address")]
    InvalidCustomHost(String),
}

impl Error {
    /// The user-facing generation error this selection failure maps to
    pub fn to_generation_error(&self) -> GenerationError {
        match self {
            Error::NoMatchingRelay | Error::InvalidCustomHost(_) => {
                GenerationError::NoMatchingRelay
            }
            Error::NoMatchingEntryRelay => GenerationError::NoMatchingEntryRelay,
            Error::NoMatchingExitRelay => GenerationError::NoMatchingExitRelay,
            Error::UnsupportedObfuscation { .. } => GenerationError::ObfuscationUnsupported,
        }
    }
}

/// The selector's view of the user settings
#[derive(Debug, Clone, Default)]
pub struct SelectorConfig {
    /// Relay constraints or a custom endpoint
    pub relay_settings: RelaySettings,
    /// Obfuscation settings
    pub obfuscation_settings: ObfuscationSettings,
}

/// The relay(s) a selection resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedRelays {
    /// A fixed user-supplied endpoint, bypassing the relay list
    Custom(CustomTunnelEndpoint),
    /// One relay serving as both entry and exit
    Singlehop {
        /// The selected relay
        exit: Relay,
    },
    /// Separate entry and exit relays
    Multihop {
        /// First hop; the endpoint we actually connect to
        entry: Relay,
        /// The relay traffic exits from
        exit: Relay,
    },
}

impl SelectedRelays {
    /// The relay whose endpoint the daemon connects to first
    pub fn first_hop(&self) -> Option<&Relay> {
        match self {
            SelectedRelays::Custom(_) => None,
            SelectedRelays::Singlehop { exit } => Some(exit),
            SelectedRelays::Multihop { entry, .. } => Some(entry),
        }
    }
}

/// A fully resolved connect configuration for one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedConfig {
    /// The relay(s) selected
    pub relays: SelectedRelays,
    /// The first-hop WireGuard endpoint
    pub endpoint: SocketAddr,
    /// The exit relay endpoint, resolved under the same port constraints as
    /// the first hop. Set only for multihop.
    pub exit_endpoint: Option<SocketAddr>,
    /// The obfuscation wrapper to apply, if any
    pub obfuscator: Option<ObfuscatorConfig>,
}

impl SelectedConfig {
    /// The endpoint description exposed in `Connecting`/`Connected` states
    pub fn tunnel_endpoint(&self) -> TunnelEndpoint {
        match &self.relays {
            SelectedRelays::Custom(custom) => TunnelEndpoint {
                exit: RelayEndpoint {
                    hostname: custom.host.clone(),
                    address: self.endpoint,
                    location: Default::default(),
                },
                entry: None,
                obfuscation: self.obfuscator.as_ref().map(|o| o.info()),
            },
            SelectedRelays::Singlehop { exit } => TunnelEndpoint {
                exit: RelayEndpoint {
                    hostname: exit.hostname.clone(),
                    address: self.endpoint,
                    location: exit.location.clone(),
                },
                entry: None,
                obfuscation: self.obfuscator.as_ref().map(|o| o.info()),
            },
            SelectedRelays::Multihop { entry, exit } => TunnelEndpoint {
                exit: RelayEndpoint {
                    hostname: exit.hostname.clone(),
                    address: self.exit_endpoint.unwrap_or_else(|| {
                        SocketAddr::new(IpAddr::V4(exit.ipv4_addr_in), DEFAULT_WIREGUARD_PORT)
                    }),
                    location: exit.location.clone(),
                },
                entry: Some(RelayEndpoint {
                    hostname: entry.hostname.clone(),
                    address: self.endpoint,
                    location: entry.location.clone(),
                }),
                obfuscation: self.obfuscator.as_ref().map(|o| o.info()),
            },
        }
    }
}

/// Picks relays under the current constraints from the current relay list.
///
/// Both the configuration and the relay list snapshot can be replaced at any
/// time; each `get_relay` call sees a consistent snapshot of both.
pub struct RelaySelector {
    config: Mutex<SelectorConfig>,
    relay_list: Mutex<Arc<RelayList>>,
}

impl RelaySelector {
    /// Create a selector over an initial configuration and relay list
    pub fn new(config: SelectorConfig, relay_list: RelayList) -> Self {
        RelaySelector {
            config: Mutex::new(config),
            relay_list: Mutex::new(Arc::new(relay_list)),
        }
    }

    /// Replace the configuration
    pub fn set_config(&self, config: SelectorConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// The current configuration
    pub fn config(&self) -> SelectorConfig {
        self.config.lock().unwrap().clone()
    }

    /// Atomically replace the relay list snapshot
    pub fn set_relay_list(&self, relay_list: RelayList) {
        *self.relay_list.lock().unwrap() = Arc::new(relay_list);
    }

    /// The current relay list snapshot
    pub fn relay_list(&self) -> Arc<RelayList> {
        self.relay_list.lock().unwrap().clone()
    }

    /// Resolve the current constraints to a concrete connect configuration.
    ///
    /// `retry_attempt` counts failed attempts since the last explicit connect
    /// command and rotates the automatic obfuscation choice.
    pub fn get_relay(&self, retry_attempt: usize) -> Result<SelectedConfig> {
        let config = self.config();
        let relay_list = self.relay_list();

        match &config.relay_settings {
            RelaySettings::Custom(custom) => Self::get_custom_config(custom),
            RelaySettings::Normal(constraints) => Self::get_normal_config(
                constraints,
                &config.obfuscation_settings,
                &relay_list,
                retry_attempt,
            ),
        }
    }

    fn get_custom_config(custom: &CustomTunnelEndpoint) -> Result<SelectedConfig> {
        let ip: IpAddr = custom
            .host
            .parse()
            .map_err(|_| Error::InvalidCustomHost(custom.host.clone()))?;
        Ok(SelectedConfig {
            relays: SelectedRelays::Custom(custom.clone()),
            endpoint: SocketAddr::new(ip, custom.port),
            exit_endpoint: None,
            obfuscator: None,
        })
    }

    fn get_normal_config(
        constraints: &RelayConstraints,
        obfuscation: &ObfuscationSettings,
        relay_list: &RelayList,
        retry_attempt: usize,
    ) -> Result<SelectedConfig> {
        let relays = if constraints.wireguard_constraints.multihop() {
            Self::get_multihop_relays(constraints, relay_list)?
        } else {
            Self::get_singlehop_relay(constraints, relay_list)?
        };

        // Obfuscation always applies to the first hop
        let first_hop = relays
            .first_hop()
            .cloned()
            .ok_or(Error::NoMatchingRelay)?;
        let endpoint = Self::wireguard_endpoint(
            &first_hop,
            &constraints.wireguard_constraints,
            obfuscation,
        )?;
        let exit_endpoint = match &relays {
            SelectedRelays::Multihop { exit, .. } => Some(Self::wireguard_endpoint(
                exit,
                &constraints.wireguard_constraints,
                obfuscation,
            )?),
            _ => None,
        };
        let obfuscator = select_obfuscator(
            obfuscation,
            constraints.wireguard_constraints.ip_version,
            &first_hop,
            endpoint,
            retry_attempt,
        )?;

        log::debug!(
            "selected {} (attempt {retry_attempt}, obfuscation: {})",
            first_hop.hostname,
            obfuscator
                .as_ref()
                .map(|o| o.info().obfuscation_type.to_string())
                .unwrap_or_else(|| "none".to_owned()),
        );

        Ok(SelectedConfig {
            relays,
            endpoint,
            exit_endpoint,
            obfuscator,
        })
    }

    fn get_singlehop_relay(
        constraints: &RelayConstraints,
        relay_list: &RelayList,
    ) -> Result<SelectedRelays> {
        let candidates =
            RelayMatcher::new_exit(constraints).filter_matching_relay_list(relay_list.relays());
        let exit = helpers::pick_random_relay(&candidates).ok_or(Error::NoMatchingRelay)?;
        Ok(SelectedRelays::Singlehop { exit: exit.clone() })
    }

    /// Pick an entry and an exit relay independently, rejecting selections
    /// where both end up on the same server.
    ///
    /// A constraint on one side may pin it to a single relay that is also a
    /// candidate for the other side; in that case the pinned side wins and
    /// the other side picks among the remaining candidates.
    fn get_multihop_relays(
        constraints: &RelayConstraints,
        relay_list: &RelayList,
    ) -> Result<SelectedRelays> {
        let exit_candidates =
            RelayMatcher::new_exit(constraints).filter_matching_relay_list(relay_list.relays());
        let entry_candidates =
            RelayMatcher::new_entry(constraints).filter_matching_relay_list(relay_list.relays());

        let (exit, entry) = match (exit_candidates.as_slice(), entry_candidates.as_slice()) {
            ([], _) => return Err(Error::NoMatchingExitRelay),
            (_, []) => return Err(Error::NoMatchingEntryRelay),
            ([exit], [entry]) if exit == entry => return Err(Error::NoMatchingRelay),
            (exits, [entry]) if exits.contains(entry) => {
                let exit = helpers::pick_random_relay_excluding(exits, entry)
                    .ok_or(Error::NoMatchingExitRelay)?;
                (exit, entry)
            }
            ([exit], entries) if entries.contains(exit) => {
                let entry = helpers::pick_random_relay_excluding(entries, exit)
                    .ok_or(Error::NoMatchingEntryRelay)?;
                (exit, entry)
            }
            (exits, entries) => {
                let exit =
                    helpers::pick_random_relay(exits).ok_or(Error::NoMatchingExitRelay)?;
                let entry = helpers::pick_random_relay_excluding(entries, exit)
                    .ok_or(Error::NoMatchingEntryRelay)?;
                (exit, entry)
            }
        };

        Ok(SelectedRelays::Multihop {
            entry: entry.clone(),
            exit: exit.clone(),
        })
    }

    /// Resolve the plain WireGuard endpoint of a relay under the current
    /// constraints. The forced-port obfuscation mode overrides the port.
    fn wireguard_endpoint(
        relay: &Relay,
        constraints: &WireguardConstraints,
        obfuscation: &ObfuscationSettings,
    ) -> Result<SocketAddr> {
        let ip = match constraints.ip_version {
            Constraint::Any | Constraint::Only(IpVersion::V4) => IpAddr::V4(relay.ipv4_addr_in),
            Constraint::Only(IpVersion::V6) => relay
                .ipv6_addr_in
                .map(IpAddr::V6)
                .ok_or(Error::NoMatchingRelay)?,
        };

        let port_constraint =
            if obfuscation.selected_obfuscation == SelectedObfuscation::WireguardPort {
                obfuscation.wireguard_port.port
            } else {
                constraints.port
            };
        let port = match port_constraint {
            Constraint::Any => DEFAULT_WIREGUARD_PORT,
            Constraint::Only(port) => port,
        };

        Ok(SocketAddr::new(ip, port))
    }
}
