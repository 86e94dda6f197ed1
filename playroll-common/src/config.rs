//! Configuration file and data directory resolution
//!
//! Settings resolve in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Application directory name used under config and data roots
pub const APP_DIR: &str = "playroll";

/// Locate the TOML config file for the platform
///
/// On Linux `~/.config/playroll/config.toml` wins over
/// `/etc/playroll/config.toml`.
pub fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Read and parse a TOML config file
pub fn load_config_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<toml::Table>(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Load the platform config file if one exists
///
/// A missing file is not an error; a malformed one is.
pub fn load_default_config_table() -> Result<Option<toml::Table>> {
    match locate_config_file() {
        Ok(path) => load_config_table(&path).map(Some),
        Err(Error::Config(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Get OS-dependent default data directory
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/playroll (or /var/lib/playroll for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(APP_DIR))
    } else if cfg!(target_os = "macos") || cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("./playroll_data"))
    } else {
        PathBuf::from("./playroll_data")
    }
}

/// Default location of the queue database
pub fn default_db_path() -> PathBuf {
    default_data_dir().join("queue.db")
}
