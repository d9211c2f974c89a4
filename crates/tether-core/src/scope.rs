//! Storage scopes for connection metadata

use serde::{Deserialize, Serialize};
use std::fmt;

/// The persistence tier that owns a record's non-secret metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageScope {
    /// Process memory only, never persisted across restarts
    Session,
    /// Persisted with the current workspace
    Workspace,
    /// Persisted for every workspace of this user
    #[default]
    Global,
}

impl StorageScope {
    /// The persistent tier backing this scope, or `None` for `Session`
    pub fn persistent(self) -> Option<PersistentScope> {
        match self {
            StorageScope::Session => None,
            StorageScope::Workspace => Some(PersistentScope::Workspace),
            StorageScope::Global => Some(PersistentScope::Global),
        }
    }

    pub fn is_persisted(self) -> bool {
        self.persistent().is_some()
    }
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageScope::Session => write!(f, "session"),
            StorageScope::Workspace => write!(f, "workspace"),
            StorageScope::Global => write!(f, "global"),
        }
    }
}

/// A key-value tier that survives restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistentScope {
    Workspace,
    Global,
}

impl PersistentScope {
    pub const ALL: [PersistentScope; 2] = [PersistentScope::Global, PersistentScope::Workspace];
}

impl From<PersistentScope> for StorageScope {
    fn from(scope: PersistentScope) -> Self {
        match scope {
            PersistentScope::Workspace => StorageScope::Workspace,
            PersistentScope::Global => StorageScope::Global,
        }
    }
}

impl fmt::Display for PersistentScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StorageScope::from(*self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_scope_is_never_persisted() {
        assert_eq!(StorageScope::Session.persistent(), None);
        assert!(!StorageScope::Session.is_persisted());
        assert_eq!(
            StorageScope::Workspace.persistent(),
            Some(PersistentScope::Workspace)
        );
        assert_eq!(StorageScope::Global.persistent(), Some(PersistentScope::Global));
    }

    #[test]
    fn test_scope_serializes_snake_case() {
        let json = serde_json::to_string(&StorageScope::Workspace).unwrap();
        assert_eq!(json, "\"workspace\"");
    }
}
