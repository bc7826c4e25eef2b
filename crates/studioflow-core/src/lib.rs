//! # Studioflow Core Library
//!
//! Core logic for Studioflow, a focus timer for content creators who move a
//! piece of work through pipeline stages (idea, script, review, record, edit).
//! Everything runs from the `studioflow` CLI binary; a GUI would be a thin
//! layer over the same library.
//!
//! ## Architecture
//!
//! - **Timer**: a per-user session state machine counting seconds per stage,
//!   driven by the caller or by a tokio [`TimerDriver`]
//! - **Stage-time ledger**: insert-only rows flushed at every checkpoint
//! - **Streaks**: lost-day detection in the user's timezone and the freeze
//!   economy that recovers them
//! - **Celebrations**: the ordered post-session sequence and trophies
//! - **Storage**: SQLite for durable data, TOML for configuration
//!
//! ## Key Components
//!
//! - [`SessionTimer`]: session state machine
//! - [`StreakContinuityValidator`]: lost days, freeze recovery and purchases
//! - [`CelebrationSequencer`]: summary, streak and trophy screens
//! - [`Database`]: implements every storage port
//! - [`Config`]: application configuration

pub mod celebration;
pub mod completion;
pub mod error;
pub mod events;
pub mod storage;
pub mod streak;
pub mod timer;

pub use celebration::{CelebrationSequencer, CelebrationStage, CelebrationView, TrophyId};
pub use completion::{complete_session, CompletedSession};
pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use events::Event;
pub use storage::{Config, Database};
pub use streak::{FreezeEconomy, Streak, StreakContinuityValidator, UserTimezone};
pub use timer::{SessionSummary, SessionTimer, Stage, TimerDriver, TimerPorts, TimerState};
