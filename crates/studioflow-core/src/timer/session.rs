use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recorder::OpenSegment;
use super::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Active,
    Paused,
}

/// Live session state, persisted as the crash-safe snapshot.
///
/// Only [`SessionTimer`](super::SessionTimer) mutates it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub is_active: bool,
    pub is_paused: bool,
    pub stage: Stage,
    /// Seconds since start, frozen while paused.
    pub elapsed_seconds: u64,
    /// Seconds in the current stage; reset on stage change.
    pub stage_elapsed_seconds: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Sticky: once set it stays set until the session ends.
    pub is_streak_mode: bool,
    pub daily_goal_minutes: u32,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub stage_totals: BTreeMap<Stage, u64>,
    /// Ledger segment not yet flushed.
    #[serde(default)]
    pub open_segment: Option<OpenSegment>,
}

impl Session {
    pub fn state(&self) -> TimerState {
        match (self.is_active, self.is_paused) {
            (false, _) => TimerState::Idle,
            (true, false) => TimerState::Active,
            (true, true) => TimerState::Paused,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_active && !self.is_paused
    }
}

/// What the timer reports when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub user_id: String,
    pub content_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_seconds: u64,
    pub final_stage: Stage,
    pub stage_totals: BTreeMap<Stage, u64>,
    pub streak_mode: bool,
    pub daily_goal_minutes: u32,
}

impl SessionSummary {
    pub fn total_minutes(&self) -> u64 {
        self.total_seconds / 60
    }

    /// Whether every pipeline stage received some time.
    pub fn covers_all_stages(&self) -> bool {
        Stage::ALL
            .iter()
            .all(|stage| self.stage_totals.get(stage).copied().unwrap_or(0) > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_flags() {
        let mut session = Session::default();
        assert_eq!(session.state(), TimerState::Idle);
        session.is_active = true;
        assert_eq!(session.state(), TimerState::Active);
        assert!(session.is_running());
        session.is_paused = true;
        assert_eq!(session.state(), TimerState::Paused);
        assert!(!session.is_running());
    }

    #[test]
    fn snapshot_tolerates_missing_optional_fields() {
        let json = r#"{
            "is_active": true,
            "is_paused": false,
            "stage": "script",
            "elapsed_seconds": 42,
            "stage_elapsed_seconds": 12,
            "is_streak_mode": false,
            "daily_goal_minutes": 30
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.stage, Stage::Script);
        assert!(session.started_at.is_none());
        assert!(session.stage_totals.is_empty());
    }
}
