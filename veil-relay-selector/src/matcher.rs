//! Relay list filtering
//!
//! The matcher decomposes the user's constraints and reduces a relay list
//! snapshot to the subset of relays that satisfy every one of them.

use veil_types::constraints::{
    Constraint, LocationConstraint, Match, Ownership, Providers, RelayConstraints,
};
use veil_types::relay_list::Relay;
use veil_types::states::IpVersion;

/// Filters a set of relays down to the candidates matching a query.
#[derive(Debug, Clone)]
pub struct RelayMatcher {
    /// Locations allowed to be picked from
    pub location: Constraint<LocationConstraint>,
    /// Providers allowed to be picked from
    pub providers: Constraint<Providers>,
    /// Ownership filter
    pub ownership: Constraint<Ownership>,
    /// WireGuard endpoint requirements
    pub wireguard: WireguardMatcher,
}

/// Protocol-level requirements a relay endpoint must satisfy
#[derive(Debug, Clone)]
pub struct WireguardMatcher {
    /// Required IP version of the relay address
    pub ip_version: Constraint<IpVersion>,
    /// Whether the relay must support DAITA
    pub daita: bool,
}

impl WireguardMatcher {
    fn is_matching_relay(&self, relay: &Relay) -> bool {
        if let Constraint::Only(IpVersion::V6) = self.ip_version {
            if relay.ipv6_addr_in.is_none() {
                return false;
            }
        }
        if self.daita && !relay.endpoint_data.daita {
            return false;
        }
        true
    }
}

impl RelayMatcher {
    /// Matcher for the exit relay of a query
    pub fn new_exit(constraints: &RelayConstraints) -> Self {
        RelayMatcher {
            location: constraints.location.clone(),
            providers: constraints.providers.clone(),
            ownership: constraints.ownership,
            wireguard: WireguardMatcher {
                ip_version: constraints.wireguard_constraints.ip_version,
                daita: constraints.wireguard_constraints.daita,
            },
        }
    }

    /// Matcher for the entry relay of a multihop query. Uses the entry
    /// constraints for location, provider and ownership; the protocol
    /// requirements are shared with the exit.
    pub fn new_entry(constraints: &RelayConstraints) -> Self {
        let wireguard_constraints = &constraints.wireguard_constraints;
        RelayMatcher {
            location: wireguard_constraints.entry_location.clone(),
            providers: wireguard_constraints.entry_providers.clone(),
            ownership: wireguard_constraints.entry_ownership,
            wireguard: WireguardMatcher {
                ip_version: wireguard_constraints.ip_version,
                daita: wireguard_constraints.daita,
            },
        }
    }

    /// Filter `relays` down to the candidates matching every constraint.
    ///
    /// When the location constraint is country-level, relays flagged with
    /// `include_in_country` are preferred; the remaining relays in that
    /// country are only considered if no flagged relay matches.
    pub fn filter_matching_relay_list<'a>(
        &self,
        relays: impl Iterator<Item = &'a Relay> + Clone,
    ) -> Vec<Relay> {
        let shortlist = relays
            .filter(|relay| relay.active)
            .filter(|relay| self.location.matches(relay))
            .filter(|relay| self.ownership.matches(relay))
            .filter(|relay| self.providers.matches(relay))
            .filter(|relay| self.wireguard.is_matching_relay(relay));

        match &self.location {
            Constraint::Only(location) if location.is_country() => {
                let (included, excluded): (Vec<&Relay>, Vec<&Relay>) =
                    shortlist.partition(|relay| relay.include_in_country);
                if included.is_empty() {
                    excluded.into_iter().cloned().collect()
                } else {
                    included.into_iter().cloned().collect()
                }
            }
            _ => shortlist.cloned().collect(),
        }
    }
}
