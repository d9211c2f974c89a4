//! Open a connection controller backed by the on-disk state files

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_connection::{
    ConnectionController, ConnectionRegistry, JsonFileStore, KeyringSecretStore, SecretVault,
};
use tether_core::{Connector, TetherError};

use crate::{
    ConnectionSettings, TetherSettings, ensure_directories, global_state_file, workspace_state_file,
};

/// Files backing the persistent tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub global: PathBuf,
    /// `None` when no workspace is open; workspace-scoped saves then fail
    pub workspace: Option<PathBuf>,
}

impl StatePaths {
    pub fn for_workspace(workspace_root: Option<&Path>) -> Result<Self> {
        Ok(Self {
            global: global_state_file()?,
            workspace: workspace_root.map(workspace_state_file).transpose()?,
        })
    }
}

/// Open the controller for the platform state directories
pub fn open_controller(
    settings: &TetherSettings,
    connector: Arc<dyn Connector>,
    workspace_root: Option<&Path>,
) -> Result<ConnectionController> {
    if let Err(err) = ensure_directories() {
        tracing::warn!("Failed to create state directories: {}", err);
    }
    let paths = StatePaths::for_workspace(workspace_root)?;
    open_controller_at(settings, connector, &paths)
}

pub fn open_controller_at(
    settings: &TetherSettings,
    connector: Arc<dyn Connector>,
    paths: &StatePaths,
) -> Result<ConnectionController> {
    let store = Arc::new(JsonFileStore::new(&paths.global, paths.workspace.clone()));
    let vault = secret_vault(&settings.connections);

    let registry = ConnectionRegistry::load(store, vault).with_context(|| {
        format!(
            "Failed to load saved connections from {:?}",
            paths.global
        )
    })?;
    tracing::info!(
        saved = registry.len(),
        secrets_available = registry.vault().is_available(),
        workspace = paths.workspace.is_some(),
        "connection registry loaded"
    );

    Ok(ConnectionController::new(
        connector,
        registry,
        settings.connections.controller_config(),
    ))
}

fn secret_vault(settings: &ConnectionSettings) -> SecretVault {
    if !settings.use_secret_store {
        tracing::info!("secret store disabled in settings, passwords are kept for this session only");
        return SecretVault::unavailable();
    }

    let store = KeyringSecretStore::with_service(settings.keyring_service.clone());
    match store.probe() {
        Ok(()) => SecretVault::new(Arc::new(store)),
        Err(TetherError::SecretStoreUnavailable(reason)) => {
            tracing::warn!(
                reason = %reason,
                "system keychain unavailable, passwords are kept for this session only"
            );
            SecretVault::unavailable()
        }
        Err(e) => {
            // The keychain answered; a bad payload is reported per-connection later
            tracing::warn!(error = %e, "keychain probe failed");
            SecretVault::new(Arc::new(store))
        }
    }
}
