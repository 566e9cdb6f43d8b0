//! Client connection settings with validation.
//!
//! Validation happens at mutation time (add/load), never during parsing:
//! a bad name or port is an explicit error before any connection exists.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fw_core::types::{ClientName, ValidationError};

/// Default client control port.
pub const DEFAULT_PORT: u16 = 36330;

/// Settings validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error(transparent)]
    InvalidName(#[from] ValidationError),

    #[error("server address cannot be empty")]
    EmptyServer,

    #[error("port cannot be 0")]
    InvalidPort,

    #[error("duplicate client name: {0}")]
    DuplicateName(String),
}

/// Connection settings for one monitored client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub name: String,
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ClientSettings {
    pub fn new(name: impl Into<String>, server: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            port,
        }
    }

    /// Validates the settings, returning the parsed client name.
    pub fn validate(&self) -> Result<ClientName, SettingsError> {
        let name = ClientName::new(self.name.clone())?;
        if self.server.trim().is_empty() {
            return Err(SettingsError::EmptyServer);
        }
        if self.port == 0 {
            return Err(SettingsError::InvalidPort);
        }
        Ok(name)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            server: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_settings_pass() {
        let settings = ClientSettings::new("rig-a", "10.0.0.5", 36330);
        assert_eq!(settings.validate().unwrap().as_str(), "rig-a");
    }

    #[test]
    fn empty_name_rejected() {
        let settings = ClientSettings::new("", "10.0.0.5", 36330);
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidName(_))
        ));
    }

    #[test]
    fn blank_server_rejected() {
        let settings = ClientSettings::new("rig-a", "   ", 36330);
        assert_eq!(settings.validate(), Err(SettingsError::EmptyServer));
    }

    #[test]
    fn zero_port_rejected() {
        let settings = ClientSettings::new("rig-a", "10.0.0.5", 0);
        assert_eq!(settings.validate(), Err(SettingsError::InvalidPort));
    }

    #[test]
    fn default_port_applies_on_deserialize() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"name":"rig-a","server":"localhost"}"#).unwrap();
        assert_eq!(settings.port, DEFAULT_PORT);
    }
}
