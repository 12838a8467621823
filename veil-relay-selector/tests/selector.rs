//! Integration tests for the relay selector
//!
//! These tests drive full selections over fixture relay lists, verifying
//! that every returned relay satisfies the constraints it was selected
//! under and that impossible constraint sets fail with the right error.

use veil_relay_selector::{Error, RelaySelector, SelectedRelays, SelectorConfig};
use veil_types::constraints::{
    Constraint, CustomTunnelEndpoint, GeographicLocationConstraint, Ownership, Providers,
    RelayConstraints, RelaySettings, WireguardConstraints,
};
use veil_types::obfuscation::{ObfuscationSettings, SelectedObfuscation, WireguardPortSettings};
use veil_types::relay_list::test_support::{relay, relay_list};
use veil_types::relay_list::RelayList;

fn fixture_list() -> RelayList {
    relay_list([
        relay("se-got-wg-001", "se", "got", true, "provider-a", 100),
        relay("se-got-wg-002", "se", "got", false, "provider-b", 100),
        relay("se-sto-wg-001", "se", "sto", true, "provider-a", 100),
        relay("de-ber-wg-001", "de", "ber", false, "provider-b", 100),
        relay("de-fra-wg-001", "de", "fra", true, "provider-c", 100),
    ])
}

fn selector_with(constraints: RelayConstraints, list: RelayList) -> RelaySelector {
    RelaySelector::new(
        SelectorConfig {
            relay_settings: RelaySettings::Normal(constraints),
            obfuscation_settings: ObfuscationSettings::default(),
        },
        list,
    )
}

#[test]
fn test_selection_satisfies_all_constraints() {
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        providers: Constraint::Only(Providers::new(["provider-a".to_owned()]).unwrap()),
        ownership: Constraint::Only(Ownership::Owned),
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());

    // Selection is random; every pick must still satisfy the constraints
    for attempt in 0..50 {
        let selected = selector.get_relay(attempt).unwrap();
        let SelectedRelays::Singlehop { exit } = &selected.relays else {
            panic!("expected singlehop selection");
        };
        assert_eq!(exit.location.country_code, "se");
        assert_eq!(exit.provider, "provider-a");
        assert!(exit.owned);
    }
}

#[test]
fn test_owned_swedish_relay_scenario() {
    // One Swedish owned relay, one Swedish rented relay: the ownership
    // constraint must exclude the rented one every time.
    let list = relay_list([
        relay("se-got-wg-001", "se", "got", true, "provider-a", 100),
        relay("se-got-wg-002", "se", "got", false, "provider-b", 100),
    ]);
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        ownership: Constraint::Only(Ownership::Owned),
        ..Default::default()
    };
    let selector = selector_with(constraints, list);

    for attempt in 0..50 {
        let selected = selector.get_relay(attempt).unwrap();
        let SelectedRelays::Singlehop { exit } = &selected.relays else {
            panic!("expected singlehop selection");
        };
        assert_eq!(exit.hostname, "se-got-wg-001");
    }
}

#[test]
fn test_no_matching_relay() {
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("no").into()),
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());
    assert_eq!(selector.get_relay(0), Err(Error::NoMatchingRelay));
}

#[test]
fn test_all_zero_weights_fail_selection() {
    let list = relay_list([
        relay("se-got-wg-001", "se", "got", true, "provider-a", 0),
        relay("se-got-wg-002", "se", "got", true, "provider-a", 0),
    ]);
    let selector = selector_with(RelayConstraints::default(), list);
    assert_eq!(selector.get_relay(0), Err(Error::NoMatchingRelay));
}

#[test]
fn test_multihop_entry_and_exit_differ() {
    let constraints = RelayConstraints {
        wireguard_constraints: WireguardConstraints {
            use_multihop: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());

    for attempt in 0..50 {
        let selected = selector.get_relay(attempt).unwrap();
        let SelectedRelays::Multihop { entry, exit } = &selected.relays else {
            panic!("expected multihop selection");
        };
        assert_ne!(entry.hostname, exit.hostname);
    }
}

#[test]
fn test_multihop_respects_entry_constraints() {
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        wireguard_constraints: WireguardConstraints {
            use_multihop: true,
            entry_location: Constraint::Only(GeographicLocationConstraint::country("de").into()),
            entry_ownership: Constraint::Only(Ownership::Rented),
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());

    for attempt in 0..50 {
        let selected = selector.get_relay(attempt).unwrap();
        let SelectedRelays::Multihop { entry, exit } = &selected.relays else {
            panic!("expected multihop selection");
        };
        assert_eq!(exit.location.country_code, "se");
        assert_eq!(entry.location.country_code, "de");
        assert!(!entry.owned);
        // The wire endpoint is the entry relay
        assert_eq!(selected.endpoint.ip(), std::net::IpAddr::V4(entry.ipv4_addr_in));
    }
}

#[test]
fn test_multihop_pinned_entry_yields_to_exit_candidates() {
    // The entry constraint pins one specific relay which is also an exit
    // candidate; the exit must then pick among the remaining relays.
    let list = relay_list([
        relay("se-got-wg-001", "se", "got", true, "provider-a", 100),
        relay("se-got-wg-002", "se", "got", true, "provider-a", 100),
    ]);
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        wireguard_constraints: WireguardConstraints {
            use_multihop: true,
            entry_location: Constraint::Only(
                GeographicLocationConstraint::hostname("se", "got", "se-got-wg-001").into(),
            ),
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, list);

    for attempt in 0..20 {
        let selected = selector.get_relay(attempt).unwrap();
        let SelectedRelays::Multihop { entry, exit } = &selected.relays else {
            panic!("expected multihop selection");
        };
        assert_eq!(entry.hostname, "se-got-wg-001");
        assert_eq!(exit.hostname, "se-got-wg-002");
    }
}

#[test]
fn test_multihop_same_single_candidate_fails() {
    let list = relay_list([relay("se-got-wg-001", "se", "got", true, "provider-a", 100)]);
    let constraints = RelayConstraints {
        wireguard_constraints: WireguardConstraints {
            use_multihop: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, list);
    assert_eq!(selector.get_relay(0), Err(Error::NoMatchingRelay));
}

#[test]
fn test_custom_endpoint_bypasses_relay_list() {
    let selector = RelaySelector::new(
        SelectorConfig {
            relay_settings: RelaySettings::Custom(CustomTunnelEndpoint {
                host: "192.0.2.1".to_owned(),
                port: 51820,
                peer_public_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_owned(),
            }),
            obfuscation_settings: ObfuscationSettings::default(),
        },
        relay_list([]),
    );

    let selected = selector.get_relay(0).unwrap();
    assert!(matches!(selected.relays, SelectedRelays::Custom(_)));
    assert_eq!(selected.endpoint, "192.0.2.1:51820".parse().unwrap());
    assert!(selected.obfuscator.is_none());
}

#[test]
fn test_forced_wireguard_port() {
    let selector = RelaySelector::new(
        SelectorConfig {
            relay_settings: RelaySettings::Normal(RelayConstraints::default()),
            obfuscation_settings: ObfuscationSettings {
                selected_obfuscation: SelectedObfuscation::WireguardPort,
                wireguard_port: WireguardPortSettings {
                    port: Constraint::Only(4000),
                },
                ..Default::default()
            },
        },
        fixture_list(),
    );

    let selected = selector.get_relay(0).unwrap();
    assert_eq!(selected.endpoint.port(), 4000);
    assert!(selected.obfuscator.is_none());
}

#[test]
fn test_replacing_relay_list_affects_selection() {
    let selector = selector_with(RelayConstraints::default(), relay_list([]));
    assert_eq!(selector.get_relay(0), Err(Error::NoMatchingRelay));

    selector.set_relay_list(fixture_list());
    assert!(selector.get_relay(0).is_ok());
}

#[test]
fn test_multihop_exit_port_follows_port_constraint() {
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        wireguard_constraints: WireguardConstraints {
            port: Constraint::Only(4000),
            use_multihop: true,
            entry_location: Constraint::Only(GeographicLocationConstraint::country("de").into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());

    let selected = selector.get_relay(0).unwrap();
    let endpoint = selected.tunnel_endpoint();
    // Both hops resolve their port under the same constraint
    assert_eq!(selected.endpoint.port(), 4000);
    assert_eq!(endpoint.exit.address.port(), 4000);
}

#[test]
fn test_tunnel_endpoint_description() {
    let constraints = RelayConstraints {
        location: Constraint::Only(GeographicLocationConstraint::country("se").into()),
        wireguard_constraints: WireguardConstraints {
            use_multihop: true,
            entry_location: Constraint::Only(GeographicLocationConstraint::country("de").into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let selector = selector_with(constraints, fixture_list());

    let selected = selector.get_relay(0).unwrap();
    let endpoint = selected.tunnel_endpoint();
    assert_eq!(endpoint.exit.location.country_code, "se");
    let entry = endpoint.entry.expect("multihop must expose an entry");
    assert_eq!(entry.location.country_code, "de");
    assert_eq!(entry.address, selected.endpoint);
}
