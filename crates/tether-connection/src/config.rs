//! Saved connection records and controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tether_core::{Descriptor, Result, StorageScope, TetherError};
use uuid::Uuid;

/// Longest display name accepted by add and rename, in characters
pub const MAX_NAME_LENGTH: usize = 128;

/// Format written by this version. Records without a descriptor are format 1.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// A saved connection in the current persisted format
///
/// The descriptor held here is always secret-free; its secrets live in the
/// secret vault under the record's `secret_ref`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    id: Uuid,
    display_name: String,
    #[serde(default)]
    storage_scope: StorageScope,
    descriptor: Descriptor,
    #[serde(default = "current_format_version")]
    format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_used: Option<chrono::DateTime<chrono::Utc>>,
}

fn current_format_version() -> u32 {
    CURRENT_FORMAT_VERSION
}

impl ConnectionRecord {
    /// Create a new record with a fresh id
    pub fn new(
        display_name: impl AsRef<str>,
        storage_scope: StorageScope,
        descriptor: Descriptor,
    ) -> Result<Self> {
        let display_name = validate_display_name(display_name.as_ref())?;
        descriptor.validate()?;
        tracing::debug!(name = %display_name, scope = %storage_scope, "creating connection record");

        Ok(Self {
            id: Uuid::new_v4(),
            display_name,
            storage_scope,
            descriptor,
            format_version: CURRENT_FORMAT_VERSION,
            last_used: None,
        })
    }

    /// Create a record titled after the descriptor's endpoint
    pub fn from_descriptor(storage_scope: StorageScope, descriptor: Descriptor) -> Result<Self> {
        let title = descriptor.title();
        Self::new(title, storage_scope, descriptor)
    }

    pub(crate) fn from_parts(
        id: Uuid,
        display_name: String,
        storage_scope: StorageScope,
        descriptor: Descriptor,
    ) -> Self {
        Self {
            id,
            display_name,
            storage_scope,
            descriptor,
            format_version: CURRENT_FORMAT_VERSION,
            last_used: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn storage_scope(&self) -> StorageScope {
        self.storage_scope
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn last_used(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_used
    }

    pub(crate) fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }

    pub(crate) fn set_descriptor(&mut self, descriptor: Descriptor) {
        self.descriptor = descriptor;
    }

    pub(crate) fn set_format_version(&mut self, version: u32) {
        self.format_version = version;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Some(chrono::Utc::now());
    }
}

/// Trim and bound a user supplied display name
pub fn validate_display_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TetherError::Validation(
            "Connection name must not be empty".into(),
        ));
    }
    let length = trimmed.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(TetherError::Validation(format!(
            "Connection name is {} characters long; the maximum is {}",
            length, MAX_NAME_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Tunables for [`ConnectionController`](crate::ConnectionController)
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Upper bound on a single connector call
    pub connect_timeout: Duration,
    /// Scope used when saving a connection without an explicit scope
    pub default_scope: StorageScope,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            default_scope: StorageScope::Global,
        }
    }
}

impl ControllerConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_default_scope(mut self, scope: StorageScope) -> Self {
        self.default_scope = scope;
        self
    }
}
