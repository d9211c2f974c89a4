//! Secret storage backed by the system keychain
//!
//! This module provides credential storage using:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (via libsecret/GNOME Keyring)
//!
//! All payloads are stored in a SINGLE keychain entry as a JSON map, so the
//! user only needs to click "Always Allow" once on macOS rather than once per
//! connection. [`SecretVault`] sits on top of a [`SecretStore`] and keeps the
//! lifecycle working when no keychain is reachable.

mod vault;

pub use vault::{SecretVault, SecretWrite};

use parking_lot::RwLock;
use std::collections::HashMap;
use tether_core::{Result, TetherError};

/// Service name used for the keychain entry
pub const DEFAULT_SERVICE_NAME: &str = "dev.tether.connections";

/// Account name for the single keychain entry that stores all payloads
const ACCOUNT_NAME: &str = "credentials";

/// Opaque key to payload storage for connection secrets
///
/// Backends report an unreachable vault as
/// `TetherError::SecretStoreUnavailable`; any other error is a failed
/// operation on a working vault.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>>;
    fn set_secret(&self, key: &str, payload: &str) -> Result<()>;
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Secret store using the system keychain
///
/// The keychain is not touched until the first read or write, to avoid
/// permission prompts for users that never save a password.
pub struct KeyringSecretStore {
    service: String,
    /// Map of key -> payload, loaded from the keychain on first access
    cache: RwLock<Option<HashMap<String, String>>>,
}

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        let service = service.into();
        tracing::debug!(service = %service, "keyring secret store initialized (payloads loaded on-demand)");
        Self {
            service,
            cache: RwLock::new(None),
        }
    }

    /// Check that the keychain can be reached, loading the cache on success
    pub fn probe(&self) -> Result<()> {
        self.with_credentials(|_| Ok(()))
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, ACCOUNT_NAME).map_err(map_keyring_error)
    }

    fn load_from_keychain(&self) -> Result<HashMap<String, String>> {
        match self.entry()?.get_password() {
            Ok(json_str) => {
                let credentials: HashMap<String, String> = serde_json::from_str(&json_str)
                    .map_err(|e| {
                        TetherError::SecretStore(format!("Keychain entry is not a JSON map: {}", e))
                    })?;
                tracing::debug!(count = credentials.len(), "loaded secrets from keychain");
                Ok(credentials)
            }
            Err(keyring::Error::NoEntry) => {
                tracing::debug!("no secrets found in keychain, starting fresh");
                Ok(HashMap::new())
            }
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn save_to_keychain(&self, credentials: &HashMap<String, String>) -> Result<()> {
        let entry = self.entry()?;

        if credentials.is_empty() {
            match entry.delete_credential() {
                Ok(()) => tracing::debug!("deleted empty secret map from keychain"),
                Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(map_keyring_error(e)),
            }
        } else {
            let json_str = serde_json::to_string(credentials)?;
            entry.set_password(&json_str).map_err(map_keyring_error)?;
            tracing::debug!(count = credentials.len(), "saved secrets to keychain");
        }

        Ok(())
    }

    /// Run `f` against the loaded map while holding the cache lock
    fn with_credentials<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> Result<T>,
    ) -> Result<T> {
        let mut cache = self.cache.write();
        if cache.is_none() {
            *cache = Some(self.load_from_keychain()?);
        }
        let credentials = cache.get_or_insert_with(HashMap::new);
        f(credentials)
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringSecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>> {
        self.with_credentials(|credentials| {
            let value = credentials.get(key).cloned();
            tracing::debug!(key = %key, found = value.is_some(), "retrieved secret");
            Ok(value)
        })
    }

    fn set_secret(&self, key: &str, payload: &str) -> Result<()> {
        self.with_credentials(|credentials| {
            let previous = credentials.insert(key.to_string(), payload.to_string());
            if let Err(e) = self.save_to_keychain(credentials) {
                // Keep the cache in line with what the keychain holds
                match previous {
                    Some(previous) => credentials.insert(key.to_string(), previous),
                    None => credentials.remove(key),
                };
                return Err(e);
            }
            tracing::debug!(key = %key, "stored secret");
            Ok(())
        })
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.with_credentials(|credentials| {
            let Some(previous) = credentials.remove(key) else {
                tracing::debug!(key = %key, "secret not found (nothing to delete)");
                return Ok(());
            };
            if let Err(e) = self.save_to_keychain(credentials) {
                credentials.insert(key.to_string(), previous);
                return Err(e);
            }
            tracing::debug!(key = %key, "deleted secret");
            Ok(())
        })
    }
}

fn map_keyring_error(e: keyring::Error) -> TetherError {
    match &e {
        keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
            TetherError::SecretStoreUnavailable(e.to_string())
        }
        _ => TetherError::SecretStore(e.to_string()),
    }
}

/// Secret store held in process memory
///
/// Used by tests and by embedders that manage secrets themselves.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.read().contains_key(key)
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.read().get(key).cloned())
    }

    fn set_secret(&self, key: &str, payload: &str) -> Result<()> {
        self.secrets
            .write()
            .insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.write().remove(key);
        Ok(())
    }
}
