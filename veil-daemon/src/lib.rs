//! Veil Daemon
//!
//! This crate provides the reusable daemon core that CLI and GUI frontends
//! use to manage VPN connections: the tunnel state machine, relay list
//! refresh, settings, device state and event fan-out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐              ┌─────────────────────┐   │
//! │  │    veil-cli     │              │   Future GUI App    │   │
//! │  └────────┬────────┘              └──────────┬──────────┘   │
//! │           │                                   │             │
//! │           └───────────────┬───────────────────┘             │
//! │                           ▼                                 │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                   veil-daemon                         │  │
//! │  │  - Daemon / DaemonHandle (main interface)             │  │
//! │  │  - TunnelStateMachine (connection lifecycle)          │  │
//! │  │  - EventBroadcaster (status updates to subscribers)   │  │
//! │  │  - RelayListUpdater (periodic relay list refresh)     │  │
//! │  │  - Config / Settings (TOML configuration)             │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Library Layer                            │
//! │  ┌─────────────────────┐    ┌─────────────────────┐         │
//! │  │ veil-relay-selector │    │     veil-types      │         │
//! │  │  - Constraint match │    │  - Tunnel states    │         │
//! │  │  - Weighted pick    │    │  - Relay list       │         │
//! │  │  - Obfuscation      │    │  - Constraints      │         │
//! │  └─────────────────────┘    └─────────────────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod relay_list;
pub mod state_machine;
pub mod tunnel;

pub use config::{Config, DaemonConfig, Settings};
pub use daemon::{Daemon, DaemonHandle};
pub use error::{Error, Result};
pub use event::{AppVersionInfo, DaemonEvent, EventBroadcaster, EventStream, RemoveDeviceEvent};
pub use relay_list::{RelayListFetcher, RelayListUpdater, StaticRelayListFetcher};
pub use state_machine::{StateMachineHandle, TunnelCommand, MAX_CONNECT_ATTEMPTS};
pub use tunnel::{
    EstablishError, NullTunnelProvider, TunnelParameters, TunnelProvider, TunnelProviderEvent,
};
