//! Error types for the daemon engine

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the daemon
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fetching the relay list failed
    #[error("relay list fetch failed: {0}")]
    RelayListFetch(String),

    /// The tunnel state machine has shut down and no longer accepts commands
    #[error("the tunnel state machine is not running")]
    StateMachineDown,

    /// The operation requires a logged-in device
    #[error("not logged in to an account")]
    NotLoggedIn,
}

impl Error {
    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}
