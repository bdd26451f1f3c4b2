//! Locations of Sterling's local files (config and logs)
//!
//! Everything lives under one data directory, `~/.sterling` unless the
//! binary overrides it at startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable that relocates the data directory
pub const DATA_DIR_ENV: &str = "STERLING_HOME";

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

fn home_fallback() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".sterling"),
        None => PathBuf::from(".sterling"),
    }
}

/// Pick the data directory from an optional override value; blank values
/// fall back to the home directory.
pub fn resolve_data_dir(custom: Option<OsString>) -> PathBuf {
    custom
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(home_fallback)
}

/// Fix the data directory for the rest of the process.
///
/// Only the first call wins; later calls are logged and ignored.
pub fn init_data_dir(custom: Option<OsString>) -> PathBuf {
    let wanted = resolve_data_dir(custom);
    let active = DATA_DIR.get_or_init(|| wanted.clone());
    if *active != wanted {
        tracing::debug!(
            wanted = %wanted.display(),
            active = %active.display(),
            "Data directory already fixed, ignoring override"
        );
    }
    active.clone()
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(home_fallback)
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// `<data dir>/logs/sterling.log`
pub fn log_file_path() -> PathBuf {
    logs_dir().join("sterling.log")
}

/// `<data dir>/config.toml`
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
