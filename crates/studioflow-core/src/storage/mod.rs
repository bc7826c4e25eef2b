mod config;
pub mod database;
pub mod migrations;
pub mod ports;

pub use config::{Config, FreezeConfig, ProfileConfig, TimerConfig, XpConfig};
pub use database::{Database, Profile, SessionRecord};
pub use ports::{
    CelebrationStore, Clock, ConfigIdentity, FixedClock, IdentityProvider, LedgerStore, ProfileStore,
    SnapshotStore, StaticIdentity, SystemClock,
};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `STUDIOFLOW_HOME` overrides the location outright. Otherwise the directory
/// is `~/.config/studioflow[-dev]/`, with `STUDIOFLOW_ENV=dev` selecting the
/// development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("STUDIOFLOW_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDIOFLOW_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studioflow-dev")
            } else {
                base_dir.join("studioflow")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
