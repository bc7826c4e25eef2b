//! Core error types for studioflow-core.
//!
//! Errors fall into three groups: authentication (abort, nothing mutated),
//! validation (single-step operations leave state untouched) and transient
//! persistence failures (logged by callers and retried at the next checkpoint).

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for studioflow-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No user identity could be resolved.
    #[error("Not authenticated: sign in before starting a session")]
    NotAuthenticated,

    /// `start` was called while a session is already running.
    #[error("A session is already active (started at {started_at})")]
    AlreadyActive {
        started_at: chrono::DateTime<chrono::Utc>,
    },

    /// The operation requires an active session.
    #[error("No active session")]
    NotActive,

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// No profile row exists for the user.
    #[error("No profile for user '{0}'")]
    ProfileMissing(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// The data directory could not be resolved or created.
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Not enough freeze credits to cover the lost days.
    #[error("Insufficient freezes: {available} available, {required} required")]
    InsufficientFreezes { available: u32, required: u32 },

    /// Not enough XP to buy the missing freezes.
    #[error("Insufficient XP: {available} available, {required} required")]
    InsufficientXp { available: i64, required: i64 },

    /// Buying would push the balance above the cap.
    #[error("Buying {to_buy} freezes would exceed the cap of {cap} (currently {available})")]
    ExceedsFreezeCap { available: u32, to_buy: u32, cap: u32 },

    /// There are no lost days to recover.
    #[error("Streak is intact, nothing to recover")]
    NothingToRecover,

    /// A stored date could not be parsed.
    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    /// Unknown stage name.
    #[error("Invalid stage '{0}' (expected idea, script, review, record or edit)")]
    InvalidStage(String),

    /// Timezone string could not be parsed.
    #[error("Invalid timezone '{0}' (expected UTC or an offset like +09:00)")]
    InvalidTimezone(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(DatabaseError::from(err))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
