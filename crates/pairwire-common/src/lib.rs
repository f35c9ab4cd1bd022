//! Centralized directory structure management for Pairwire
//!
//! Directory layout:
//! ```text
//! pairwire_data/
//! └── local/           # SQLite store (connections, messages, identities)
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data root
pub const ROOT_ENV: &str = "PAIRWIRE_ROOT";

/// Fallback data root, relative to the working directory
pub const DEFAULT_ROOT: &str = "pairwire_data";

#[derive(Deserialize, Debug, Default)]
struct PairwireConfig {
    pairwire_root: Option<PathBuf>,
}

/// Get the global configuration path
fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pairwire").join("config.json"))
}

fn read_root_from(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<PairwireConfig>(&content) {
            Ok(config) => config.pairwire_root,
            Err(e) => {
                warn!("Failed to parse config file at {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read config file at {:?}: {}", path, e);
            None
        }
    }
}

/// Load the persistent root from config file
pub fn load_persistent_root() -> Option<PathBuf> {
    read_root_from(&get_config_path()?)
}

/// Pick the data root: explicit override first, then the persisted root,
/// then [`DEFAULT_ROOT`].
pub fn resolve_root(env_override: Option<String>, persisted: Option<PathBuf>) -> PathBuf {
    env_override
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or(persisted)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT))
}

/// Get the data root from environment, persistent config, or default
pub fn pairwire_root() -> PathBuf {
    resolve_root(std::env::var(ROOT_ENV).ok(), load_persistent_root())
}

/// Local data directory (SQLite)
pub fn local_dir() -> PathBuf {
    pairwire_root().join("local")
}

/// Database file path
pub fn db_path() -> PathBuf {
    local_dir().join("pairwire.sqlite")
}

/// Ensure a single directory exists
pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

/// Initialize the directory structure.
/// Call this once at startup before opening the store.
pub fn init_structure() -> anyhow::Result<PathBuf> {
    let root = pairwire_root();

    ensure_dir(&root)?;
    ensure_dir(&local_dir())?;

    let canonical = fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
    info!("Pairwire directory structure initialized at: {:?}", canonical);

    Ok(canonical)
}
