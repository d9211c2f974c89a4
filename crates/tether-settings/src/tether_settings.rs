//! Tether Settings
//!
//! Host-side wiring for the connection lifecycle manager:
//! - User settings (connection defaults, logging) persisted as JSON
//! - Platform paths for the global and per-workspace state files
//! - Logging initialization
//! - Opening a ready-to-use [`ConnectionController`]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tether_connection::{ControllerConfig, DEFAULT_SERVICE_NAME};
use tether_core::StorageScope;

mod bootstrap;
pub mod logging;
mod settings_file;

pub use bootstrap::{StatePaths, open_controller, open_controller_at};
pub use settings_file::*;

#[doc(no_inline)]
pub use tether_connection::ConnectionController;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TetherSettings {
    pub connections: ConnectionSettings,
    pub logging: LogSettings,
}

impl TetherSettings {
    /// Load from the user settings file, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        serde_json::from_str(&content).with_context(|| "Failed to parse settings JSON")
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn settings_path() -> Result<PathBuf> {
        settings_file()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Scope used when a connection is saved without an explicit one
    pub default_storage_scope: StorageScope,
    pub connect_timeout_ms: u64,
    /// Keep passwords in the system keychain; when off they live for the session only
    pub use_secret_store: bool,
    pub keyring_service: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            default_storage_scope: StorageScope::Global,
            connect_timeout_ms: 30_000,
            use_secret_store: true,
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl ConnectionSettings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms.max(1)))
            .with_default_scope(self.default_storage_scope)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` still wins when set
    pub filter: Option<String>,
    pub enable_json_logs: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: None,
            enable_json_logs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = TetherSettings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, TetherSettings::default());
        assert_eq!(settings.connections.connect_timeout_ms, 30_000);
        assert!(settings.connections.use_secret_store);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "connections": { "default_storage_scope": "workspace" } }"#,
        )
        .unwrap();

        let settings = TetherSettings::load_from(&path).unwrap();
        assert_eq!(
            settings.connections.default_storage_scope,
            StorageScope::Workspace
        );
        assert_eq!(settings.connections.keyring_service, DEFAULT_SERVICE_NAME);
        assert_eq!(settings.logging, LogSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = TetherSettings::default();
        settings.connections.connect_timeout_ms = 5_000;
        settings.logging.filter = Some("debug".into());
        settings.save_to(&path).unwrap();

        assert_eq!(TetherSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TetherSettings::load_from(&path).is_err());
    }

    #[test]
    fn test_controller_config() {
        let settings = ConnectionSettings {
            default_storage_scope: StorageScope::Session,
            connect_timeout_ms: 0,
            ..Default::default()
        };
        let config = settings.controller_config();
        assert_eq!(config.default_scope, StorageScope::Session);
        assert_eq!(config.connect_timeout, Duration::from_millis(1));
    }
}
