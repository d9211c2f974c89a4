//! Conversion of persisted records into the current format
//!
//! Older releases stored each connection as a nested connection model with
//! passwords inline. [`migrate`] turns any persisted record, old or current,
//! into a current-format record plus the secrets that must be moved into the
//! secret vault. It performs no I/O; the registry decides when the result is
//! written back.

mod legacy;

pub use legacy::{
    LegacyAuthStrategy, LegacyConnectionModel, LegacyHost, LegacyRecord, LegacySshTunnel,
    LegacySslMethod,
};

use serde_json::Value;
use tether_core::{ConnectionSecrets, Result, SecretRef, StorageScope, TetherError};
use uuid::Uuid;

use crate::config::{CURRENT_FORMAT_VERSION, ConnectionRecord, MAX_NAME_LENGTH};

/// A record exactly as read from a persistence tier
#[derive(Clone, Debug, PartialEq)]
pub enum PersistedRecord {
    Current(ConnectionRecord),
    Legacy(LegacyRecord),
}

impl PersistedRecord {
    /// Classify a stored value by shape.
    ///
    /// Anything carrying a `descriptor` is current. Anything without one but
    /// with a nested `connectionModel` is format 1.
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(TetherError::Validation(
                "Persisted connection is not an object".into(),
            ));
        };

        if object.contains_key("descriptor") {
            Ok(Self::Current(serde_json::from_value(value)?))
        } else if object.contains_key("connectionModel") {
            Ok(Self::Legacy(serde_json::from_value(value)?))
        } else {
            Err(TetherError::Validation(
                "Persisted connection has neither a descriptor nor a connection model".into(),
            ))
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Result of migrating one record
#[derive(Clone, Debug, PartialEq)]
pub struct Migration {
    /// Secret-free record in the current format
    pub record: ConnectionRecord,
    /// Secrets to hand to the vault; empty when there is nothing to store
    pub secrets: ConnectionSecrets,
    /// Whether the input was in an older format and must be written back
    pub upgraded: bool,
}

/// Migrate a persisted record into the current format.
///
/// `scope` is the tier the record was loaded from and becomes the record's
/// storage scope when the old format did not carry one. Migrating an already
/// migrated record yields the same record and no secrets.
pub fn migrate(persisted: PersistedRecord, scope: StorageScope) -> Result<Migration> {
    match persisted {
        PersistedRecord::Current(mut record) => {
            let upgraded = record.format_version() < CURRENT_FORMAT_VERSION;
            let (clean, secrets) = record
                .descriptor()
                .extract_secrets(SecretRef(record.id().to_string()));
            record.set_descriptor(clean);
            record.set_format_version(CURRENT_FORMAT_VERSION);
            Ok(Migration {
                upgraded: upgraded || !secrets.is_empty(),
                record,
                secrets,
            })
        }
        PersistedRecord::Legacy(legacy) => migrate_legacy(legacy, scope),
    }
}

fn migrate_legacy(legacy: LegacyRecord, scope: StorageScope) -> Result<Migration> {
    let id = Uuid::parse_str(legacy.id.trim()).map_err(|e| {
        TetherError::Validation(format!("Legacy connection id {:?} is invalid: {}", legacy.id, e))
    })?;

    let descriptor = legacy.connection_model.to_descriptor()?;
    // Older releases did not bound names, so long ones are cut rather than rejected
    let display_name: String = legacy
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| legacy.connection_model.title())
        .chars()
        .take(MAX_NAME_LENGTH)
        .collect();

    let (clean, secrets) = descriptor.extract_secrets(SecretRef(id.to_string()));
    tracing::debug!(
        connection_id = %id,
        has_secrets = !secrets.is_empty(),
        "converted legacy connection model"
    );

    Ok(Migration {
        record: ConnectionRecord::from_parts(id, display_name, scope, clean),
        secrets,
        upgraded: true,
    })
}

#[cfg(test)]
mod tests;
