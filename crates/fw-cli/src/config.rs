//! Configuration loading and management.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use fw_client::{ClientSettings, SettingsError};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the work unit history database.
    pub database_path: PathBuf,

    /// Directory holding persisted log mirrors.
    pub mirror_dir: PathBuf,

    /// Monitored clients.
    #[serde(default)]
    pub clients: Vec<ClientSettings>,

    /// Run client retrieval cycles serially instead of in parallel.
    #[serde(default)]
    pub serial_retrieval: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("mirror_dir", &self.mirror_dir)
            .field("clients", &self.clients.len())
            .field("serial_retrieval", &self.serial_retrieval)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("history.db"),
            mirror_dir: data_dir.join("logs"),
            clients: Vec::new(),
            serial_retrieval: false,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (FW_*)
        figment = figment.merge(Env::prefixed("FW_"));

        figment.extract()
    }

    /// Validates every configured client, rejecting duplicate names.
    pub fn validate_clients(&self) -> Result<(), SettingsError> {
        let mut seen = HashSet::new();
        for settings in &self.clients {
            let name = settings.validate()?;
            if !seen.insert(name.to_string()) {
                return Err(SettingsError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Returns the platform-specific config directory for fw.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("foldwatch"))
}

/// Returns the platform-specific data directory for fw.
///
/// On Linux: `~/.local/share/foldwatch`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("foldwatch"))
}
