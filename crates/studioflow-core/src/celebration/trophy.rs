//! Threshold trophies.
//!
//! Evaluation is a pure function over a [`StatsSnapshot`]; how the snapshot is
//! gathered is the store's business.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::timer::Stage;

/// Immutable statistics a trophy check looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_seconds: u64,
    pub seconds_by_stage: BTreeMap<Stage, u64>,
    pub sessions_completed: u64,
    pub streak_mode_sessions: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrophyId {
    FirstSession,
    TenSessions,
    FiftySessions,
    TenHours,
    FirstStreakSession,
    ThreeDayStreak,
    SevenDayStreak,
    ThirtyDayStreak,
    FullPipeline,
}

impl TrophyId {
    /// Catalog order, which is also display order.
    pub const ALL: [TrophyId; 9] = [
        TrophyId::FirstSession,
        TrophyId::TenSessions,
        TrophyId::FiftySessions,
        TrophyId::TenHours,
        TrophyId::FirstStreakSession,
        TrophyId::ThreeDayStreak,
        TrophyId::SevenDayStreak,
        TrophyId::ThirtyDayStreak,
        TrophyId::FullPipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrophyId::FirstSession => "first_session",
            TrophyId::TenSessions => "ten_sessions",
            TrophyId::FiftySessions => "fifty_sessions",
            TrophyId::TenHours => "ten_hours",
            TrophyId::FirstStreakSession => "first_streak_session",
            TrophyId::ThreeDayStreak => "three_day_streak",
            TrophyId::SevenDayStreak => "seven_day_streak",
            TrophyId::ThirtyDayStreak => "thirty_day_streak",
            TrophyId::FullPipeline => "full_pipeline",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            TrophyId::FirstSession => "First Take",
            TrophyId::TenSessions => "Regular",
            TrophyId::FiftySessions => "Studio Veteran",
            TrophyId::TenHours => "Ten Hours In",
            TrophyId::FirstStreakSession => "In The Zone",
            TrophyId::ThreeDayStreak => "Warming Up",
            TrophyId::SevenDayStreak => "Full Week",
            TrophyId::ThirtyDayStreak => "Unstoppable",
            TrophyId::FullPipeline => "Idea To Edit",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TrophyId::FirstSession => "Finish your first session",
            TrophyId::TenSessions => "Finish 10 sessions",
            TrophyId::FiftySessions => "Finish 50 sessions",
            TrophyId::TenHours => "Log 10 hours across all stages",
            TrophyId::FirstStreakSession => "Keep a session going past the streak threshold",
            TrophyId::ThreeDayStreak => "Reach a 3-day streak",
            TrophyId::SevenDayStreak => "Reach a 7-day streak",
            TrophyId::ThirtyDayStreak => "Reach a 30-day streak",
            TrophyId::FullPipeline => "Log time in every stage",
        }
    }

    /// Whether `stats` meets this trophy's threshold.
    pub fn is_met(&self, stats: &StatsSnapshot) -> bool {
        let best_streak = stats.longest_streak.max(stats.current_streak);
        match self {
            TrophyId::FirstSession => stats.sessions_completed >= 1,
            TrophyId::TenSessions => stats.sessions_completed >= 10,
            TrophyId::FiftySessions => stats.sessions_completed >= 50,
            TrophyId::TenHours => stats.total_seconds >= 10 * 3600,
            TrophyId::FirstStreakSession => stats.streak_mode_sessions >= 1,
            TrophyId::ThreeDayStreak => best_streak >= 3,
            TrophyId::SevenDayStreak => best_streak >= 7,
            TrophyId::ThirtyDayStreak => best_streak >= 30,
            TrophyId::FullPipeline => Stage::ALL
                .iter()
                .all(|stage| stats.seconds_by_stage.get(stage).copied().unwrap_or(0) > 0),
        }
    }
}

impl fmt::Display for TrophyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrophyId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrophyId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "trophy_id".into(),
                message: format!("unknown trophy '{s}'"),
            })
    }
}

/// Persisted unlock marker. `shown_at == None` means unlocked but not yet shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrophyUnlock {
    pub trophy: TrophyId,
    pub unlocked_at: DateTime<Utc>,
    pub shown_at: Option<DateTime<Utc>>,
}

/// Every trophy whose threshold `stats` meets, in catalog order.
pub fn evaluate(stats: &StatsSnapshot) -> Vec<TrophyId> {
    TrophyId::ALL
        .into_iter()
        .filter(|id| id.is_met(stats))
        .collect()
}

/// Trophies met by `stats` that are not in `already_unlocked`.
pub fn newly_unlocked(stats: &StatsSnapshot, already_unlocked: &HashSet<TrophyId>) -> Vec<TrophyId> {
    evaluate(stats)
        .into_iter()
        .filter(|id| !already_unlocked.contains(id))
        .collect()
}
