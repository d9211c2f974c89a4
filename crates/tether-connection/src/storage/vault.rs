use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_core::{ConnectionSecrets, Result, TetherError};
use uuid::Uuid;

use super::SecretStore;

/// Where a secret write ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretWrite {
    /// Written to the backing secret store
    Persisted,
    /// Held for this session only
    SessionOnly,
}

/// Connection secrets keyed by connection id, with a session fallback
///
/// When the backing store is missing or reports itself unreachable the vault
/// enters degraded mode: secrets are kept in memory for the rest of the
/// session and the condition is logged once.
pub struct SecretVault {
    backend: Option<Arc<dyn SecretStore>>,
    degraded: AtomicBool,
    degraded_logged: AtomicBool,
    session: RwLock<HashMap<Uuid, ConnectionSecrets>>,
}

impl SecretVault {
    pub fn new(backend: Arc<dyn SecretStore>) -> Self {
        Self {
            backend: Some(backend),
            degraded: AtomicBool::new(false),
            degraded_logged: AtomicBool::new(false),
            session: RwLock::new(HashMap::new()),
        }
    }

    /// A vault with no backing store; every secret is session-only
    pub fn unavailable() -> Self {
        Self {
            backend: None,
            degraded: AtomicBool::new(true),
            degraded_logged: AtomicBool::new(false),
            session: RwLock::new(HashMap::new()),
        }
    }

    /// Whether secrets currently survive a restart
    pub fn is_available(&self) -> bool {
        self.backend.is_some() && !self.degraded.load(Ordering::Acquire)
    }

    fn available_backend(&self) -> Option<&Arc<dyn SecretStore>> {
        if self.degraded.load(Ordering::Acquire) {
            None
        } else {
            self.backend.as_ref()
        }
    }

    fn note_unavailable(&self, reason: &str) {
        self.degraded.store(true, Ordering::Release);
        if !self.degraded_logged.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                error = %TetherError::SecretStoreUnavailable(reason.to_string()),
                "secrets will be kept for this session only"
            );
        }
    }

    /// Fetch the secrets for a connection; empty when none are stored
    pub fn get_secret(&self, id: Uuid) -> Result<ConnectionSecrets> {
        if let Some(secrets) = self.session.read().get(&id) {
            return Ok(secrets.clone());
        }

        let Some(backend) = self.available_backend() else {
            self.note_unavailable("no secret store configured");
            return Ok(ConnectionSecrets::default());
        };

        match backend.get_secret(&id.to_string()) {
            Ok(Some(payload)) => {
                let secrets = ConnectionSecrets::from_payload(&payload)?;
                self.session.write().insert(id, secrets.clone());
                Ok(secrets)
            }
            Ok(None) => Ok(ConnectionSecrets::default()),
            Err(TetherError::SecretStoreUnavailable(reason)) => {
                self.note_unavailable(&reason);
                Ok(ConnectionSecrets::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Store the secrets for a connection.
    ///
    /// With `persist` false the secrets are only held for this session. Any
    /// error other than an unreachable store is returned and leaves the vault
    /// unchanged, so callers must not write metadata after a failure.
    pub fn set_secret(
        &self,
        id: Uuid,
        secrets: &ConnectionSecrets,
        persist: bool,
    ) -> Result<SecretWrite> {
        let mut written = SecretWrite::SessionOnly;

        if persist {
            match self.available_backend() {
                Some(backend) => {
                    let key = id.to_string();
                    let result = if secrets.is_empty() {
                        backend.delete_secret(&key)
                    } else {
                        backend.set_secret(&key, &secrets.to_payload()?)
                    };
                    match result {
                        Ok(()) => written = SecretWrite::Persisted,
                        Err(TetherError::SecretStoreUnavailable(reason)) => {
                            self.note_unavailable(&reason)
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => self.note_unavailable("no secret store configured"),
            }
        }

        let mut session = self.session.write();
        if secrets.is_empty() {
            session.remove(&id);
        } else {
            session.insert(id, secrets.clone());
        }
        Ok(written)
    }

    /// Remove the secrets for a connection from the store and the session
    pub fn delete_secret(&self, id: Uuid) -> Result<()> {
        if let Some(backend) = self.available_backend() {
            match backend.delete_secret(&id.to_string()) {
                Ok(()) => {}
                Err(TetherError::SecretStoreUnavailable(reason)) => self.note_unavailable(&reason),
                Err(e) => return Err(e),
            }
        }
        self.session.write().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySecretStore;
    use pretty_assertions::assert_eq;

    struct UnreachableStore;

    impl SecretStore for UnreachableStore {
        fn get_secret(&self, _key: &str) -> Result<Option<String>> {
            Err(TetherError::SecretStoreUnavailable("locked".into()))
        }
        fn set_secret(&self, _key: &str, _payload: &str) -> Result<()> {
            Err(TetherError::SecretStoreUnavailable("locked".into()))
        }
        fn delete_secret(&self, _key: &str) -> Result<()> {
            Err(TetherError::SecretStoreUnavailable("locked".into()))
        }
    }

    fn secrets() -> ConnectionSecrets {
        ConnectionSecrets {
            password: Some("p@ss".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_persisted_secrets_reach_the_backend() {
        let backend = Arc::new(MemorySecretStore::new());
        let vault = SecretVault::new(backend.clone());
        let id = Uuid::new_v4();

        assert_eq!(vault.set_secret(id, &secrets(), true).unwrap(), SecretWrite::Persisted);
        assert!(backend.contains(&id.to_string()));

        let fresh = SecretVault::new(backend.clone());
        assert_eq!(fresh.get_secret(id).unwrap(), secrets());

        vault.delete_secret(id).unwrap();
        assert!(backend.is_empty());
        assert!(vault.get_secret(id).unwrap().is_empty());
    }

    #[test]
    fn test_session_scope_never_touches_the_backend() {
        let backend = Arc::new(MemorySecretStore::new());
        let vault = SecretVault::new(backend.clone());
        let id = Uuid::new_v4();

        assert_eq!(vault.set_secret(id, &secrets(), false).unwrap(), SecretWrite::SessionOnly);
        assert!(backend.is_empty());
        assert_eq!(vault.get_secret(id).unwrap(), secrets());
    }

    #[test]
    fn test_unreachable_backend_degrades_to_session() {
        let vault = SecretVault::new(Arc::new(UnreachableStore));
        let id = Uuid::new_v4();
        assert!(vault.is_available());

        assert_eq!(vault.set_secret(id, &secrets(), true).unwrap(), SecretWrite::SessionOnly);
        assert!(!vault.is_available());
        assert_eq!(vault.get_secret(id).unwrap(), secrets());
        vault.delete_secret(id).unwrap();
        assert!(vault.get_secret(id).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_vault_is_degraded_from_the_start() {
        let vault = SecretVault::unavailable();
        assert!(!vault.is_available());
        let id = Uuid::new_v4();
        assert_eq!(vault.set_secret(id, &secrets(), true).unwrap(), SecretWrite::SessionOnly);
        assert_eq!(vault.get_secret(id).unwrap(), secrets());
    }
}
