//! Relay list model
//!
//! An immutable snapshot of the relays available for selection, organised by
//! country and city. Snapshots are produced by the relay-list fetcher and
//! atomically replaced; they are never mutated in place.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// A full relay list snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayList {
    /// Cache validator from the fetch, used to detect unchanged lists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// All countries with at least one relay
    pub countries: Vec<RelayListCountry>,
}

impl RelayList {
    /// Returns true if the list contains no relays at all
    pub fn is_empty(&self) -> bool {
        self.relays().next().is_none()
    }

    /// Iterate over every relay in the list
    pub fn relays(&self) -> impl Iterator<Item = &Relay> + Clone {
        self.countries
            .iter()
            .flat_map(|country| &country.cities)
            .flat_map(|city| &city.relays)
    }

    /// Look up a country by its code
    pub fn lookup_country(&self, country_code: &str) -> Option<&RelayListCountry> {
        self.countries
            .iter()
            .find(|country| country.code == country_code)
    }

    /// Look up a city by country and city code
    pub fn lookup_city(&self, country_code: &str, city_code: &str) -> Option<&RelayListCity> {
        self.lookup_country(country_code)
            .and_then(|country| country.cities.iter().find(|city| city.code == city_code))
    }

    /// Look up a relay by hostname
    pub fn lookup_relay(&self, hostname: &str) -> Option<&Relay> {
        self.relays().find(|relay| relay.hostname == hostname)
    }
}

/// All relays in one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayListCountry {
    /// Human-readable country name
    pub name: String,
    /// Lower-case country code, e.g. `se`
    pub code: String,
    /// Cities with at least one relay
    pub cities: Vec<RelayListCity>,
}

/// All relays in one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayListCity {
    /// Human-readable city name
    pub name: String,
    /// Lower-case city code, e.g. `got`
    pub code: String,
    /// Approximate latitude of the city
    pub latitude: f64,
    /// Approximate longitude of the city
    pub longitude: f64,
    /// Relays hosted in this city
    pub relays: Vec<Relay>,
}

/// Geographic location of a relay, denormalized onto each relay so that
/// matching never needs to walk back up the country/city tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human-readable country name
    pub country: String,
    /// Lower-case country code
    pub country_code: String,
    /// Human-readable city name
    pub city: String,
    /// Lower-case city code
    pub city_code: String,
    /// Approximate latitude
    pub latitude: f64,
    /// Approximate longitude
    pub longitude: f64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

/// A single relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    /// Unique hostname, e.g. `se-got-wg-001`
    pub hostname: String,
    /// IPv4 address to connect to
    pub ipv4_addr_in: Ipv4Addr,
    /// IPv6 address to connect to, if the relay has one
    pub ipv6_addr_in: Option<Ipv6Addr>,
    /// Whether this relay should be preferred when the location constraint
    /// is a whole country
    pub include_in_country: bool,
    /// Whether the relay is currently in service
    pub active: bool,
    /// Whether the relay runs on hardware owned by the VPN provider
    pub owned: bool,
    /// Hosting provider identifier
    pub provider: String,
    /// Selection probability weight. Higher weight means proportionally
    /// higher chance of being picked. Zero removes the relay from selection.
    pub weight: u64,
    /// WireGuard endpoint capabilities
    pub endpoint_data: WireguardRelayEndpointData,
    /// Where the relay is located
    pub location: Location,
}

/// Relays are identified by hostname; two snapshots of the same relay with
/// different metadata still refer to the same server.
impl PartialEq for Relay {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
    }
}

impl Eq for Relay {}

impl Hash for Relay {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.ipv4_addr_in)
    }
}

/// WireGuard endpoint data advertised by a relay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireguardRelayEndpointData {
    /// The relay's WireGuard public key, base64-encoded
    pub public_key: String,
    /// Whether the relay supports DAITA traffic shaping
    pub daita: bool,
    /// QUIC obfuscation support, if advertised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quic: Option<Quic>,
    /// Whether the relay supports LWO obfuscation
    pub lwo: bool,
    /// Extra addresses accepting Shadowsocks-wrapped traffic
    pub shadowsocks_extra_addr_in: Vec<IpAddr>,
}

/// QUIC obfuscation parameters advertised by a relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quic {
    /// Addresses accepting QUIC-wrapped traffic
    pub addr_in: Vec<IpAddr>,
    /// TLS hostname to present
    pub domain: String,
    /// Authentication token for the QUIC proxy
    pub token: String,
}

/// Fixture builders shared by unit and integration tests.
pub mod test_support {
    use super::*;

    /// Build a relay with the given identity and selection attributes.
    /// Endpoint data advertises no optional obfuscation support.
    pub fn relay(
        hostname: &str,
        country_code: &str,
        city_code: &str,
        owned: bool,
        provider: &str,
        weight: u64,
    ) -> Relay {
        Relay {
            hostname: hostname.to_owned(),
            ipv4_addr_in: Ipv4Addr::new(185, 213, 154, 68),
            ipv6_addr_in: None,
            include_in_country: true,
            active: true,
            owned,
            provider: provider.to_owned(),
            weight,
            endpoint_data: WireguardRelayEndpointData {
                public_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_owned(),
                ..Default::default()
            },
            location: Location {
                country: country_code.to_uppercase(),
                country_code: country_code.to_owned(),
                city: city_code.to_uppercase(),
                city_code: city_code.to_owned(),
                latitude: 57.7,
                longitude: 11.97,
            },
        }
    }

    /// Build a relay list containing the given relays, grouped by the
    /// country and city codes already present on each relay.
    pub fn relay_list(relays: impl IntoIterator<Item = Relay>) -> RelayList {
        let mut list = RelayList::default();
        for relay in relays {
            let country_code = relay.location.country_code.clone();
            let city_code = relay.location.city_code.clone();

            let country = match list.countries.iter_mut().find(|c| c.code == country_code) {
                Some(country) => country,
                None => {
                    list.countries.push(RelayListCountry {
                        name: relay.location.country.clone(),
                        code: country_code.clone(),
                        cities: Vec::new(),
                    });
                    list.countries.last_mut().unwrap()
                }
            };

            let city = match country.cities.iter_mut().find(|c| c.code == city_code) {
                Some(city) => city,
                None => {
                    country.cities.push(RelayListCity {
                        name: relay.location.city.clone(),
                        code: city_code.clone(),
                        latitude: relay.location.latitude,
                        longitude: relay.location.longitude,
                        relays: Vec::new(),
                    });
                    country.cities.last_mut().unwrap()
                }
            };

            city.relays.push(relay);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{relay, relay_list};

    #[test]
    fn test_lookup() {
        let list = relay_list([
            relay("se-got-wg-001", "se", "got", true, "provider-a", 100),
            relay("se-sto-wg-001", "se", "sto", true, "provider-a", 100),
            relay("de-ber-wg-001", "de", "ber", false, "provider-b", 100),
        ]);

        assert_eq!(list.countries.len(), 2);
        assert_eq!(list.lookup_country("se").unwrap().cities.len(), 2);
        assert!(list.lookup_city("se", "got").is_some());
        assert!(list.lookup_city("se", "ber").is_none());
        assert_eq!(
            list.lookup_relay("de-ber-wg-001").unwrap().provider,
            "provider-b"
        );
        assert_eq!(list.relays().count(), 3);
    }

    #[test]
    fn test_empty_list() {
        let list = relay_list([]);
        assert!(list.is_empty());
        assert!(list.lookup_relay("se-got-wg-001").is_none());
    }
}
