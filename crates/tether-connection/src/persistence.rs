//! Key-value tiers holding non-secret connection metadata

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tether_core::{PersistentScope, Result, TetherError};

/// Scoped key-value storage with a workspace tier and a global tier
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str, scope: PersistentScope) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value, scope: PersistentScope) -> Result<()>;
    fn remove(&self, key: &str, scope: PersistentScope) -> Result<()>;
}

/// In-memory tiers, used for tests and for hosts without a data directory
#[derive(Default)]
pub struct MemoryKeyValueStore {
    tiers: RwLock<HashMap<PersistentScope, Map<String, Value>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str, scope: PersistentScope) -> Result<Option<Value>> {
        Ok(self
            .tiers
            .read()
            .get(&scope)
            .and_then(|tier| tier.get(key))
            .cloned())
    }

    fn set(&self, key: &str, value: Value, scope: PersistentScope) -> Result<()> {
        self.tiers
            .write()
            .entry(scope)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str, scope: PersistentScope) -> Result<()> {
        if let Some(tier) = self.tiers.write().get_mut(&scope) {
            tier.remove(key);
        }
        Ok(())
    }
}

/// One JSON object file per tier
///
/// The workspace tier is optional; without an open workspace its reads are
/// empty and its writes fail.
pub struct JsonFileStore {
    global_path: PathBuf,
    workspace_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(global_path: impl Into<PathBuf>, workspace_path: Option<PathBuf>) -> Self {
        Self {
            global_path: global_path.into(),
            workspace_path,
            write_lock: Mutex::new(()),
        }
    }

    fn path(&self, scope: PersistentScope) -> Option<&Path> {
        match scope {
            PersistentScope::Global => Some(&self.global_path),
            PersistentScope::Workspace => self.workspace_path.as_deref(),
        }
    }

    fn writable_path(&self, scope: PersistentScope) -> Result<&Path> {
        self.path(scope).ok_or_else(|| {
            TetherError::Storage(format!("No {} state file is configured", scope))
        })
    }

    fn read_tier(path: &Path) -> Result<Map<String, Value>> {
        if !path.exists() {
            return Ok(Map::new());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(TetherError::Storage(format!(
                "State file {} does not hold a JSON object",
                path.display()
            ))),
        }
    }

    fn write_tier(path: &Path, tier: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(tier)?;
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;

        tracing::debug!(path = %path.display(), keys = tier.len(), "wrote state file");
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str, scope: PersistentScope) -> Result<Option<Value>> {
        let Some(path) = self.path(scope) else {
            return Ok(None);
        };
        Ok(Self::read_tier(path)?.remove(key))
    }

    fn set(&self, key: &str, value: Value, scope: PersistentScope) -> Result<()> {
        let path = self.writable_path(scope)?;
        let _guard = self.write_lock.lock();
        let mut tier = Self::read_tier(path)?;
        tier.insert(key.to_string(), value);
        Self::write_tier(path, &tier)
    }

    fn remove(&self, key: &str, scope: PersistentScope) -> Result<()> {
        let path = self.writable_path(scope)?;
        let _guard = self.write_lock.lock();
        let mut tier = Self::read_tier(path)?;
        if tier.remove(key).is_some() {
            Self::write_tier(path, &tier)?;
        }
        Ok(())
    }
}
