//! Settings file utilities

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .context("Could not determine config directory")
        .map(|p| p.join("tether"))
}

pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .context("Could not determine data directory")
        .map(|p| p.join("tether"))
}

pub fn settings_file() -> Result<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// State shared by every workspace
pub fn global_state_file() -> Result<PathBuf> {
    data_dir().map(|p| p.join("global_state.json"))
}

pub fn workspaces_dir() -> Result<PathBuf> {
    data_dir().map(|p| p.join("workspaces"))
}

/// State for one workspace, keyed by its root path
pub fn workspace_state_file(workspace_root: &Path) -> Result<PathBuf> {
    workspaces_dir().map(|p| p.join(workspace_key(workspace_root)).join("state.json"))
}

/// Readable, filesystem-safe directory name that stays stable across releases
fn workspace_key(workspace_root: &Path) -> String {
    let raw = workspace_root.to_string_lossy();

    // FNV-1a, so the key does not depend on the std hasher
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in raw.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    let name: String = workspace_root
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(32)
        .collect();

    if name.is_empty() {
        format!("{:016x}", hash)
    } else {
        format!("{}-{:016x}", name, hash)
    }
}

pub fn ensure_directories() -> Result<()> {
    let dirs = [config_dir()?, data_dir()?, workspaces_dir()?];
    for dir in dirs {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }
    }
    Ok(())
}
