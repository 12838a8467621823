//! Relay selection constraints
//!
//! The user never picks a relay directly. Instead the settings carry a set of
//! constraints (location, provider, ownership, protocol details) and the relay
//! selector resolves them against the current relay list on every connect
//! attempt.

use std::collections::HashSet;
use std::fmt;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::relay_list::Relay;
use crate::states::IpVersion;

/// A constraint on some value: either anything goes, or only a specific
/// value (or set of values) is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Constraint<T> {
    /// No restriction
    #[default]
    Any,
    /// Only the contained value is allowed
    Only(T),
}

impl<T> Constraint<T> {
    /// Returns true if this constraint is `Any`
    pub fn is_any(&self) -> bool {
        matches!(self, Constraint::Any)
    }

    /// Map the constrained value, keeping `Any` as-is
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Constraint<U> {
        match self {
            Constraint::Any => Constraint::Any,
            Constraint::Only(value) => Constraint::Only(f(value)),
        }
    }

    /// Borrow the constrained value
    pub fn as_ref(&self) -> Constraint<&T> {
        match self {
            Constraint::Any => Constraint::Any,
            Constraint::Only(value) => Constraint::Only(value),
        }
    }

    /// Convert to an `Option`, discarding the `Any` case
    pub fn option(self) -> Option<T> {
        match self {
            Constraint::Any => None,
            Constraint::Only(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Constraint<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Constraint::Only(value),
            None => Constraint::Any,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Constraint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => write!(f, "any"),
            Constraint::Only(value) => value.fmt(f),
        }
    }
}

/// Matching a constrained value against a candidate.
pub trait Match<T> {
    /// Returns true if `other` satisfies this value
    fn matches(&self, other: &T) -> bool;
}

/// A constraint is itself a matcher: `Any` matches everything, `Only`
/// delegates to the contained value.
impl<T, U: Match<T>> Match<T> for Constraint<U> {
    fn matches(&self, other: &T) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Only(value) => value.matches(other),
        }
    }
}

/// A single geographic location, from coarse (country) to exact (hostname).
///
/// Codes are the lower-case identifiers used by the relay list
/// (e.g. `se`, `got`, `se-got-wg-001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographicLocationConstraint {
    /// All relays in a country
    Country(String),
    /// All relays in a city: (country code, city code)
    City(String, String),
    /// One specific relay: (country code, city code, hostname)
    Hostname(String, String, String),
}

impl GeographicLocationConstraint {
    /// Constrain to a country
    pub fn country(country: impl Into<String>) -> Self {
        GeographicLocationConstraint::Country(country.into())
    }

    /// Constrain to a city
    pub fn city(country: impl Into<String>, city: impl Into<String>) -> Self {
        GeographicLocationConstraint::City(country.into(), city.into())
    }

    /// Constrain to a single relay
    pub fn hostname(
        country: impl Into<String>,
        city: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        GeographicLocationConstraint::Hostname(country.into(), city.into(), hostname.into())
    }

    /// Returns true if this is a country-level constraint
    pub fn is_country(&self) -> bool {
        matches!(self, GeographicLocationConstraint::Country(_))
    }
}

impl Match<Relay> for GeographicLocationConstraint {
    fn matches(&self, relay: &Relay) -> bool {
        match self {
            GeographicLocationConstraint::Country(country) => {
                relay.location.country_code == *country
            }
            GeographicLocationConstraint::City(country, city) => {
                relay.location.country_code == *country && relay.location.city_code == *city
            }
            GeographicLocationConstraint::Hostname(country, city, hostname) => {
                relay.location.country_code == *country
                    && relay.location.city_code == *city
                    && relay.hostname == *hostname
            }
        }
    }
}

impl fmt::Display for GeographicLocationConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeographicLocationConstraint::Country(country) => write!(f, "{country}"),
            GeographicLocationConstraint::City(country, city) => write!(f, "{city}, {country}"),
            GeographicLocationConstraint::Hostname(country, city, hostname) => {
                write!(f, "{hostname} ({city}, {country})")
            }
        }
    }
}

/// Location constraint: either one geographic location or a custom list of
/// locations. Custom lists are stored already resolved to their member
/// locations; a relay matches if it matches any member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationConstraint {
    /// A single geographic location
    Location(GeographicLocationConstraint),
    /// Any of the listed locations
    CustomList(Vec<GeographicLocationConstraint>),
}

impl Match<Relay> for LocationConstraint {
    fn matches(&self, relay: &Relay) -> bool {
        match self {
            LocationConstraint::Location(location) => location.matches(relay),
            LocationConstraint::CustomList(locations) => {
                locations.iter().any(|location| location.matches(relay))
            }
        }
    }
}

impl LocationConstraint {
    /// Returns true if any contained constraint is country-level
    pub fn is_country(&self) -> bool {
        match self {
            LocationConstraint::Location(location) => location.is_country(),
            LocationConstraint::CustomList(locations) => {
                locations.iter().any(|location| location.is_country())
            }
        }
    }
}

impl From<GeographicLocationConstraint> for LocationConstraint {
    fn from(location: GeographicLocationConstraint) -> Self {
        LocationConstraint::Location(location)
    }
}

/// Who runs the relay hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    /// Relays owned and operated by the VPN provider itself
    Owned,
    /// Relays rented from a hosting provider
    Rented,
}

impl Match<Relay> for Ownership {
    fn matches(&self, relay: &Relay) -> bool {
        match self {
            Ownership::Owned => relay.owned,
            Ownership::Rented => !relay.owned,
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Owned => write!(f, "owned"),
            Ownership::Rented => write!(f, "rented"),
        }
    }
}

/// A non-empty allow-list of hosting providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Providers(HashSet<String>);

/// Error returned when trying to build an empty provider list.
/// An empty allow-list would match nothing; "no provider preference"
/// is expressed as `Constraint::Any` instead.
#[derive(Debug, thiserror::Error)]
#[error("provider list must not be empty")]
pub struct NoProviders;

impl Providers {
    /// Create a provider allow-list from a non-empty iterator
    pub fn new(providers: impl IntoIterator<Item = String>) -> Result<Self, NoProviders> {
        let providers: HashSet<String> = providers.into_iter().collect();
        if providers.is_empty() {
            return Err(NoProviders);
        }
        Ok(Providers(providers))
    }

    /// Returns true if `provider` is in the allow-list
    pub fn contains(&self, provider: &str) -> bool {
        self.0.contains(provider)
    }

    /// Iterate over the allowed providers
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl Match<Relay> for Providers {
    fn matches(&self, relay: &Relay) -> bool {
        self.contains(&relay.provider)
    }
}

/// WireGuard-specific constraints, governing both the exit relay endpoint
/// and, when multihop is enabled, the entry relay selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WireguardConstraints {
    /// Remote port to connect to
    pub port: Constraint<u16>,
    /// IP protocol version for the relay endpoint
    pub ip_version: Constraint<IpVersion>,
    /// Networks routed through the tunnel. Empty means all traffic.
    pub allowed_ips: Vec<IpNet>,
    /// Route through an entry relay before the exit relay
    pub use_multihop: bool,
    /// Location constraint for the entry relay (multihop only)
    pub entry_location: Constraint<LocationConstraint>,
    /// Provider constraint for the entry relay (multihop only)
    pub entry_providers: Constraint<Providers>,
    /// Ownership constraint for the entry relay (multihop only)
    pub entry_ownership: Constraint<Ownership>,
    /// Require relays that support DAITA traffic shaping
    pub daita: bool,
    /// Use a quantum-resistant key exchange on top of the tunnel
    pub quantum_resistant: bool,
}

impl WireguardConstraints {
    /// Returns true if multihop is enabled
    pub fn multihop(&self) -> bool {
        self.use_multihop
    }
}

/// Relay selection constraints applied on every connect attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RelayConstraints {
    /// Location constraint for the exit relay
    pub location: Constraint<LocationConstraint>,
    /// Provider allow-list for the exit relay
    pub providers: Constraint<Providers>,
    /// Ownership constraint for the exit relay
    pub ownership: Constraint<Ownership>,
    /// WireGuard protocol constraints
    pub wireguard_constraints: WireguardConstraints,
}

/// A fixed endpoint configured by the user, bypassing relay selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTunnelEndpoint {
    /// Host to connect to
    pub host: String,
    /// Remote port
    pub port: u16,
    /// The peer's WireGuard public key, base64-encoded
    pub peer_public_key: String,
}

/// How the relay (or custom endpoint) to connect to is decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaySettings {
    /// Connect to a fixed, user-supplied endpoint
    Custom(CustomTunnelEndpoint),
    /// Select a relay from the relay list under the given constraints
    Normal(RelayConstraints),
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings::Normal(RelayConstraints::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay_list::test_support::relay;

    #[test]
    fn test_constraint_any_matches_everything() {
        let constraint: Constraint<Ownership> = Constraint::Any;
        let owned = relay("se-got-wg-001", "se", "got", true, "provider-a", 100);
        let rented = relay("se-got-wg-002", "se", "got", false, "provider-b", 100);
        assert!(constraint.matches(&owned));
        assert!(constraint.matches(&rented));
    }

    #[test]
    fn test_constraint_usable_as_generic_matcher() {
        fn filter<'a>(matcher: &impl Match<Relay>, relays: &'a [Relay]) -> Vec<&'a Relay> {
            relays.iter().filter(|relay| matcher.matches(relay)).collect()
        }

        let relays = [
            relay("se-got-wg-001", "se", "got", true, "provider-a", 100),
            relay("se-got-wg-002", "se", "got", false, "provider-b", 100),
        ];

        let owned_only = Constraint::Only(Ownership::Owned);
        assert_eq!(filter(&owned_only, &relays).len(), 1);

        let unconstrained: Constraint<Ownership> = Constraint::Any;
        assert_eq!(filter(&unconstrained, &relays).len(), 2);
    }

    #[test]
    fn test_ownership_matching() {
        let owned = relay("se-got-wg-001", "se", "got", true, "provider-a", 100);
        let rented = relay("se-got-wg-002", "se", "got", false, "provider-b", 100);

        assert!(Ownership::Owned.matches(&owned));
        assert!(!Ownership::Owned.matches(&rented));
        assert!(Ownership::Rented.matches(&rented));
        assert!(!Ownership::Rented.matches(&owned));
    }

    #[test]
    fn test_location_hierarchy() {
        let relay = relay("se-got-wg-001", "se", "got", true, "provider-a", 100);

        assert!(GeographicLocationConstraint::country("se").matches(&relay));
        assert!(!GeographicLocationConstraint::country("de").matches(&relay));
        assert!(GeographicLocationConstraint::city("se", "got").matches(&relay));
        assert!(!GeographicLocationConstraint::city("se", "sto").matches(&relay));
        assert!(
            GeographicLocationConstraint::hostname("se", "got", "se-got-wg-001").matches(&relay)
        );
        assert!(
            !GeographicLocationConstraint::hostname("se", "got", "se-got-wg-002").matches(&relay)
        );
    }

    #[test]
    fn test_custom_list_matches_any_member() {
        let relay = relay("de-ber-wg-001", "de", "ber", true, "provider-a", 100);
        let list = LocationConstraint::CustomList(vec![
            GeographicLocationConstraint::country("se"),
            GeographicLocationConstraint::city("de", "ber"),
        ]);
        assert!(list.matches(&relay));

        let miss = LocationConstraint::CustomList(vec![
            GeographicLocationConstraint::country("no"),
            GeographicLocationConstraint::country("fi"),
        ]);
        assert!(!miss.matches(&relay));
    }

    #[test]
    fn test_empty_providers_rejected() {
        assert!(Providers::new(std::iter::empty()).is_err());
        let providers = Providers::new(["provider-a".to_owned()]).unwrap();
        assert!(providers.contains("provider-a"));
        assert!(!providers.contains("provider-b"));
    }

    #[test]
    fn test_relay_settings_roundtrip() {
        let settings = RelaySettings::Normal(RelayConstraints {
            location: Constraint::Only(LocationConstraint::Location(
                GeographicLocationConstraint::city("se", "got"),
            )),
            providers: Constraint::Only(Providers::new(["provider-a".to_owned()]).unwrap()),
            ownership: Constraint::Only(Ownership::Owned),
            wireguard_constraints: WireguardConstraints {
                port: Constraint::Only(443),
                use_multihop: true,
                entry_location: Constraint::Only(LocationConstraint::Location(
                    GeographicLocationConstraint::country("de"),
                )),
                ..Default::default()
            },
        });

        let json = serde_json::to_string(&settings).unwrap();
        let restored: RelaySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, restored);
    }
}
