//! Account device state
//!
//! The daemon tracks whether it is logged in to an account and which device
//! identity it uses. The account backend itself is an external collaborator;
//! the daemon only reacts to the resulting state changes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A registered device identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Unique device identifier assigned by the backend
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// The device's WireGuard public key, base64-encoded
    pub pubkey: String,
}

/// An account paired with the device registered for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAndDevice {
    /// Account number
    pub account: String,
    /// This daemon's device registration
    pub device: Device,
}

/// Login state of the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceState {
    /// Logged in with a registered device
    LoggedIn(AccountAndDevice),
    /// Not logged in
    LoggedOut,
    /// The device registration was revoked by the backend
    Revoked,
}

impl DeviceState {
    /// Returns true if the daemon is logged in
    pub fn is_logged_in(&self) -> bool {
        matches!(self, DeviceState::LoggedIn(_))
    }

    /// The logged-in account and device, if any
    pub fn logged_in(&self) -> Option<&AccountAndDevice> {
        match self {
            DeviceState::LoggedIn(account_and_device) => Some(account_and_device),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::LoggedIn(account_and_device) => {
                write!(f, "logged in as {}", account_and_device.device.name)
            }
            DeviceState::LoggedOut => write!(f, "logged out"),
            DeviceState::Revoked => write!(f, "device revoked"),
        }
    }
}

/// What triggered a device state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventCause {
    LoggedIn,
    LoggedOut,
    Revoked,
    Updated,
    RotatedKey,
}

/// A device state change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Why the state changed
    pub cause: DeviceEventCause,
    /// The state after the change
    pub new_state: DeviceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_state_accessors() {
        let state = DeviceState::LoggedIn(AccountAndDevice {
            account: "1234567890".to_owned(),
            device: Device {
                id: "device-1".to_owned(),
                name: "brave otter".to_owned(),
                pubkey: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_owned(),
            },
        });
        assert!(state.is_logged_in());
        assert_eq!(state.logged_in().unwrap().device.name, "brave otter");

        assert!(!DeviceState::LoggedOut.is_logged_in());
        assert!(DeviceState::Revoked.logged_in().is_none());
    }
}
