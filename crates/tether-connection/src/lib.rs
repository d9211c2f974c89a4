//! Tether Connection - saved connections and the active connection lifecycle
//!
//! This crate persists connection records (migrating older formats on the
//! fly), keeps their secrets in the system keychain, and drives the single
//! active connection through connect and disconnect while notifying
//! listeners of every settled change.

mod config;
mod events;
mod lifecycle;
mod manager;
pub mod migrate;
mod persistence;
mod registry;
mod storage;

pub use config::{
    CURRENT_FORMAT_VERSION, ConnectionRecord, ControllerConfig, MAX_NAME_LENGTH,
    validate_display_name,
};
pub use events::{ChangeNotifier, ConnectionEvent, EventKind, Listener, ListenerId};
pub use lifecycle::{ActiveAttempt, ConnectOutcome, ConnectionState, DisconnectOutcome};
pub use manager::ConnectionController;
pub use migrate::{Migration, PersistedRecord, migrate};
pub use persistence::{JsonFileStore, KeyValueStore, MemoryKeyValueStore};
pub use registry::{ConnectionRegistry, SAVED_CONNECTIONS_KEY};
pub use storage::{
    DEFAULT_SERVICE_NAME, KeyringSecretStore, MemorySecretStore, SecretStore, SecretVault,
    SecretWrite,
};
