//! Saved connection registry
//!
//! The registry owns every saved record, split across the session, workspace
//! and global tiers. Non-secret metadata goes to a [`KeyValueStore`]; secrets
//! go to the [`SecretVault`]. Every mutation touches the vault before the
//! metadata so a stored record never references secrets that failed to save.
//!
//! Records written by older releases are migrated the first time they are
//! listed or looked up.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::{Descriptor, PersistentScope, Result, SecretRef, StorageScope, TetherError};
use uuid::Uuid;

use crate::config::{CURRENT_FORMAT_VERSION, ConnectionRecord, validate_display_name};
use crate::migrate::{PersistedRecord, migrate};
use crate::persistence::KeyValueStore;
use crate::storage::{SecretVault, SecretWrite};

/// Key under which each tier stores its `{ id: record }` map
pub const SAVED_CONNECTIONS_KEY: &str = "saved_connections";

struct Entry {
    record: PersistedRecord,
    /// Tier the entry lives in
    scope: StorageScope,
    /// The tier still holds the legacy blob because its secrets could only
    /// be kept for this session; the blob must not be overwritten
    legacy_on_disk: bool,
}

pub struct ConnectionRegistry {
    store: Arc<dyn KeyValueStore>,
    vault: SecretVault,
    entries: RwLock<HashMap<Uuid, Entry>>,
    active_id: RwLock<Option<Uuid>>,
    /// Held across every read-modify-write of a tier map
    tier_lock: Mutex<()>,
}

impl ConnectionRegistry {
    /// Create an empty registry without reading any tier
    pub fn new(store: Arc<dyn KeyValueStore>, vault: SecretVault) -> Self {
        Self {
            store,
            vault,
            entries: RwLock::new(HashMap::new()),
            active_id: RwLock::new(None),
            tier_lock: Mutex::new(()),
        }
    }

    /// Create a registry populated from both persistent tiers
    #[tracing::instrument(skip(store, vault))]
    pub fn load(store: Arc<dyn KeyValueStore>, vault: SecretVault) -> Result<Self> {
        let registry = Self::new(store, vault);
        for scope in PersistentScope::ALL {
            registry.load_tier(scope)?;
        }
        Ok(registry)
    }

    /// Read one tier into memory, replacing what was loaded from it before.
    ///
    /// Returns the number of records found. Values that are not records at
    /// all are skipped with a warning.
    pub fn load_tier(&self, scope: PersistentScope) -> Result<usize> {
        let tier = self.read_tier(scope)?;
        let tier_scope = StorageScope::from(scope);

        let mut loaded = Vec::with_capacity(tier.len());
        for (key, value) in tier {
            let id = match Uuid::parse_str(&key) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(key = %key, scope = %scope, error = %e, "skipping saved connection with invalid id");
                    continue;
                }
            };
            match PersistedRecord::from_value(value) {
                Ok(record) => loaded.push((id, record)),
                Err(e) => {
                    tracing::warn!(connection_id = %id, scope = %scope, error = %e, "skipping unreadable saved connection");
                }
            }
        }

        let count = loaded.len();
        let legacy = loaded.iter().filter(|(_, r)| r.is_legacy()).count();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.scope != tier_scope);
        for (id, record) in loaded {
            entries.insert(
                id,
                Entry {
                    record,
                    scope: tier_scope,
                    legacy_on_disk: false,
                },
            );
        }

        tracing::info!(scope = %scope, count, legacy, "loaded saved connections");
        Ok(count)
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    /// Save a new record.
    ///
    /// Secrets in the record's descriptor are moved to the vault; the stored
    /// metadata only carries a reference to them.
    #[tracing::instrument(skip(self, record), fields(connection_id = %record.id()))]
    pub fn add(&self, mut record: ConnectionRecord) -> Result<Uuid> {
        let id = record.id();
        validate_display_name(record.display_name())?;
        record.descriptor().validate()?;
        if self.contains(id) {
            return Err(TetherError::Validation(format!(
                "Connection {} already exists",
                id
            )));
        }

        let (clean, secrets) = record
            .descriptor()
            .extract_secrets(SecretRef(id.to_string()));
        record.set_descriptor(clean);

        self.vault
            .set_secret(id, &secrets, record.storage_scope().is_persisted())?;
        if let Err(e) = self.write_record(&record) {
            if let Err(cleanup) = self.vault.delete_secret(id) {
                tracing::warn!(error = %cleanup, "failed to clean up secrets after metadata write failed");
            }
            return Err(e);
        }

        let scope = record.storage_scope();
        self.entries.write().insert(
            id,
            Entry {
                record: PersistedRecord::Current(record),
                scope,
                legacy_on_disk: false,
            },
        );
        tracing::info!(scope = %scope, "saved connection");
        Ok(id)
    }

    /// Delete a record, its secrets first
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let scope = self.entry_scope(id).ok_or(TetherError::NotFound(id))?;

        self.vault.delete_secret(id)?;
        if let Some(tier) = scope.persistent() {
            self.remove_from_tier(id, tier)?;
        }

        self.entries.write().remove(&id);
        let mut active = self.active_id.write();
        if *active == Some(id) {
            *active = None;
        }
        tracing::info!(scope = %scope, "removed connection");
        Ok(())
    }

    /// Change a record's display name and persist it.
    ///
    /// On error the record is left exactly as it was.
    #[tracing::instrument(skip(self, name))]
    pub fn rename(&self, id: Uuid, name: &str) -> Result<ConnectionRecord> {
        let name = validate_display_name(name)?;
        let mut record = self.get(id)?;
        record.set_display_name(name);

        let secrets = self.vault.get_secret(id)?;
        let written = self
            .vault
            .set_secret(id, &secrets, record.storage_scope().is_persisted())?;
        let keep_legacy = self.legacy_on_disk(id) && written != SecretWrite::Persisted;
        if keep_legacy {
            tracing::info!("secret store unavailable; rename applies to this session only");
        } else {
            self.write_record(&record)?;
        }

        self.replace_current(&record, keep_legacy);
        tracing::debug!(name = %record.display_name(), "renamed connection");
        Ok(record)
    }

    /// All readable records, ordered case-insensitively by display name
    pub fn list(&self) -> Vec<ConnectionRecord> {
        let ids: Vec<Uuid> = self.entries.read().keys().copied().collect();

        let mut records: Vec<ConnectionRecord> = ids
            .into_iter()
            .filter_map(|id| match self.get(id) {
                Ok(record) => Some(record),
                Err(TetherError::NotFound(_)) => None,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "omitting connection from list");
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
                .then_with(|| a.display_name().cmp(b.display_name()))
                .then_with(|| a.id().cmp(&b.id()))
        });
        records
    }

    /// Look up a record, migrating it first if it is in an older format
    pub fn get(&self, id: Uuid) -> Result<ConnectionRecord> {
        let (persisted, scope) = {
            let entries = self.entries.read();
            let entry = entries.get(&id).ok_or(TetherError::NotFound(id))?;
            if let PersistedRecord::Current(record) = &entry.record
                && record.format_version() >= CURRENT_FORMAT_VERSION
                && !record.descriptor().has_inline_secrets()
            {
                return Ok(record.clone());
            }
            (entry.record.clone(), entry.scope)
        };

        self.migrate_entry(id, persisted, scope)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The record's descriptor joined with its secrets, ready for a connector
    pub fn resolve_descriptor(&self, id: Uuid) -> Result<Descriptor> {
        let record = self.get(id)?;
        let descriptor = record.descriptor();
        if descriptor.secret_ref.is_none() {
            return Ok(descriptor.clone());
        }

        let secrets = self.vault.get_secret(id)?;
        if secrets.is_empty() {
            tracing::warn!(connection_id = %id, "no stored secrets found for connection");
        }
        Ok(descriptor.merge_secrets(&secrets))
    }

    pub fn active_id(&self) -> Option<Uuid> {
        *self.active_id.read()
    }

    pub(crate) fn set_active(&self, id: Option<Uuid>) {
        *self.active_id.write() = id;
    }

    /// Stamp the record as used now and persist the stamp
    pub fn touch_last_used(&self, id: Uuid) -> Result<()> {
        let mut record = self.get(id)?;
        record.touch();
        let keep_legacy = self.legacy_on_disk(id);
        if !keep_legacy {
            self.write_record(&record)?;
        }
        self.replace_current(&record, keep_legacy);
        Ok(())
    }

    fn entry_scope(&self, id: Uuid) -> Option<StorageScope> {
        self.entries.read().get(&id).map(|entry| entry.scope)
    }

    fn legacy_on_disk(&self, id: Uuid) -> bool {
        self.entries
            .read()
            .get(&id)
            .is_some_and(|entry| entry.legacy_on_disk)
    }

    fn replace_current(&self, record: &ConnectionRecord, legacy_on_disk: bool) {
        if let Some(entry) = self.entries.write().get_mut(&record.id()) {
            entry.record = PersistedRecord::Current(record.clone());
            entry.legacy_on_disk = legacy_on_disk;
        }
    }

    /// Bring an entry into the current format.
    ///
    /// On failure the stored record is left untouched so the next access
    /// retries; an unconvertible record stays hidden from `list` until fixed.
    fn migrate_entry(
        &self,
        id: Uuid,
        persisted: PersistedRecord,
        scope: StorageScope,
    ) -> Result<ConnectionRecord> {
        let migration = migrate(persisted, scope).inspect_err(|e| {
            tracing::warn!(connection_id = %id, scope = %scope, error = %e, "saved connection could not be migrated");
        })?;

        let record = migration.record;
        let persist = scope.is_persisted();
        let written = if migration.secrets.is_empty() {
            None
        } else {
            Some(self.vault.set_secret(id, &migration.secrets, persist)?)
        };

        let upgrade_on_disk = persist && migration.upgraded;
        // Overwriting would lose the only durable copy of the secrets
        let keep_legacy = upgrade_on_disk && written == Some(SecretWrite::SessionOnly);
        if keep_legacy {
            tracing::info!(connection_id = %id, "secret store unavailable; keeping legacy record on disk");
        } else if upgrade_on_disk {
            self.write_record(&record)?;
            tracing::info!(connection_id = %id, scope = %scope, "migrated saved connection");
        }

        if let Some(entry) = self.entries.write().get_mut(&id)
            && entry.scope == scope
        {
            entry.record = PersistedRecord::Current(record.clone());
            entry.legacy_on_disk = keep_legacy;
        }
        Ok(record)
    }

    fn read_tier(&self, scope: PersistentScope) -> Result<Map<String, Value>> {
        match self.store.get(SAVED_CONNECTIONS_KEY, scope)? {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(TetherError::Storage(format!(
                "Saved connections in the {} tier are not a JSON object",
                scope
            ))),
        }
    }

    fn write_record(&self, record: &ConnectionRecord) -> Result<()> {
        let Some(tier) = record.storage_scope().persistent() else {
            return Ok(());
        };
        let value = serde_json::to_value(record)?;
        let _guard = self.tier_lock.lock();
        let mut map = self.read_tier(tier)?;
        map.insert(record.id().to_string(), value);
        self.store.set(SAVED_CONNECTIONS_KEY, Value::Object(map), tier)
    }

    fn remove_from_tier(&self, id: Uuid, tier: PersistentScope) -> Result<()> {
        let _guard = self.tier_lock.lock();
        let mut map = self.read_tier(tier)?;
        if map.remove(&id.to_string()).is_some() {
            self.store.set(SAVED_CONNECTIONS_KEY, Value::Object(map), tier)?;
        }
        Ok(())
    }
}
