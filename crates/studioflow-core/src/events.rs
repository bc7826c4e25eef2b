use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::{SessionSummary, Stage, TimerState};

/// Every state change of the session timer produces an Event.
/// The UI renders from them; the CLI prints them as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: Uuid,
        stage: Stage,
        content_id: Option<String>,
        at: DateTime<Utc>,
    },
    SessionPaused {
        elapsed_seconds: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        elapsed_seconds: u64,
        at: DateTime<Utc>,
    },
    StageChanged {
        from: Stage,
        to: Stage,
        /// Seconds of `from` handed to the recorder by this change.
        flushed_seconds: u64,
        at: DateTime<Utc>,
    },
    /// The session crossed the streak threshold. Emitted once per session.
    StreakModeEntered {
        elapsed_seconds: u64,
        at: DateTime<Utc>,
    },
    SessionEnded {
        summary: SessionSummary,
    },
    SessionReset {
        at: DateTime<Utc>,
    },
    StateSnapshot {
        state: TimerState,
        stage: Stage,
        elapsed_seconds: u64,
        stage_elapsed_seconds: u64,
        is_streak_mode: bool,
        content_id: Option<String>,
        pending_ledger_rows: usize,
        at: DateTime<Utc>,
    },
}
