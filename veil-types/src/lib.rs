//! Data model for the Veil VPN daemon
//!
//! This crate contains the plain types shared between the daemon, the relay
//! selector and any frontend: tunnel states, relay lists, selection
//! constraints, obfuscation settings and device state. It performs no I/O and
//! holds no running state.
//!
//! Every `oneof`-shaped concept (tunnel state, relay settings, error cause)
//! is a Rust enum so that "exactly one variant populated" holds by
//! construction rather than by validation.

pub mod constraints;
pub mod device;
pub mod obfuscation;
pub mod relay_list;
pub mod states;

pub use constraints::{
    Constraint, GeographicLocationConstraint, LocationConstraint, Match, NoProviders, Ownership,
    Providers, RelayConstraints, RelaySettings, WireguardConstraints,
};
pub use device::{AccountAndDevice, Device, DeviceEvent, DeviceEventCause, DeviceState};
pub use obfuscation::{
    ObfuscationInfo, ObfuscationSettings, ObfuscationType, SelectedObfuscation,
    ShadowsocksSettings, Udp2TcpSettings, WireguardPortSettings,
};
pub use relay_list::{
    Location, Quic, Relay, RelayList, RelayListCity, RelayListCountry,
    WireguardRelayEndpointData,
};
pub use states::{
    ActionAfterDisconnect, AuthFailedError, ErrorState, ErrorStateCause, FeatureIndicator,
    FeatureIndicators, FirewallPolicyError, GenerationError, IpVersion, RelayEndpoint,
    TunnelEndpoint, TunnelMetadata, TunnelState,
};

/// Default WireGuard port used when no port constraint is set.
pub const DEFAULT_WIREGUARD_PORT: u16 = 51820;
