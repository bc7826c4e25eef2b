//! Glue between the end of a session and the celebration.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{CelebrationStore, Database, ProfileStore, XpConfig};
use crate::streak::{Streak, StreakContinuityValidator, StreakUpdate};
use crate::timer::{SessionSummary, SessionTimer};

/// Inputs for [`CelebrationSequencer::trigger`](crate::celebration::CelebrationSequencer::trigger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSession {
    pub summary: SessionSummary,
    /// Streak to celebrate; zero when this session did not extend it.
    pub streak_count: u32,
    pub xp_gained: i64,
    pub streak: Streak,
    /// The session row and its XP made it to the store.
    pub recorded: bool,
}

/// XP earned by a finished session.
pub fn xp_for(summary: &SessionSummary, xp: &XpConfig) -> i64 {
    let minutes = i64::try_from(summary.total_minutes()).unwrap_or(i64::MAX);
    let bonus = if summary.streak_mode {
        xp.streak_mode_bonus
    } else {
        0
    };
    minutes.saturating_mul(xp.per_minute).saturating_add(bonus)
}

/// End the timer, store the session, award XP and count the day.
///
/// Only ending the timer can fail. Once the summary exists every store write
/// is best-effort: a failure is logged and the celebration inputs come back
/// anyway. XP is credited in the same transaction as the session row, so a
/// replayed summary cannot award twice and a failed credit leaves no row.
pub fn complete_session(
    timer: &mut SessionTimer,
    db: &Database,
    validator: &StreakContinuityValidator,
    xp: &XpConfig,
) -> Result<CompletedSession> {
    let summary = timer.end()?;

    let earned = xp_for(&summary, xp);
    let (recorded, xp_gained) = match db.record_session(&summary, earned) {
        Ok(true) => (true, earned),
        Ok(false) => {
            tracing::warn!(session_id = %summary.session_id, "session already recorded, no XP awarded");
            (true, 0)
        }
        Err(e) => {
            tracing::warn!(
                session_id = %summary.session_id,
                error = %e,
                "failed to record session, no XP awarded"
            );
            (false, 0)
        }
    };

    let update = match register_day(&summary, db, validator) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(session_id = %summary.session_id, error = %e, "failed to count today toward the streak");
            StreakUpdate {
                streak: db.streak(&summary.user_id).unwrap_or_default(),
                extended: false,
            }
        }
    };

    tracing::info!(
        session_id = %summary.session_id,
        xp_gained,
        recorded,
        streak_extended = update.extended,
        "session completed"
    );
    Ok(CompletedSession {
        summary,
        streak_count: if update.extended {
            update.streak.current_streak
        } else {
            0
        },
        xp_gained,
        streak: update.streak,
        recorded,
    })
}

fn register_day(
    summary: &SessionSummary,
    db: &Database,
    validator: &StreakContinuityValidator,
) -> Result<StreakUpdate> {
    let profile = db.profile(&summary.user_id)?;
    let today = profile.timezone.day_key(summary.ended_at);
    let seconds_today = db
        .daily_seconds(&summary.user_id, &profile.timezone, today, today)?
        .get(&today)
        .copied()
        .unwrap_or(0);
    validator.register_qualifying_day(seconds_today / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FixedClock, ProfileConfig, StaticIdentity, TimerConfig};
    use crate::streak::FreezeEconomy;
    use crate::timer::{Stage, TimerPorts};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn run(minutes: u64) -> (Arc<Database>, CompletedSession) {
        run_with(minutes, |_| {})
    }

    fn run_with(minutes: u64, before_end: impl FnOnce(&Database)) -> (Arc<Database>, CompletedSession) {
        let db = Arc::new(Database::open_memory().unwrap());
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()));
        let ports = TimerPorts {
            identity: Arc::new(StaticIdentity::signed_in("u1")),
            snapshots: db.clone(),
            ledger: db.clone(),
            clock: clock.clone(),
        };
        let mut timer = SessionTimer::load(ports, TimerConfig::default());
        timer.start(Stage::Idea, None, 30).unwrap();
        for _ in 0..minutes * 60 {
            clock.advance(Duration::seconds(1));
            timer.tick();
        }
        before_end(&db);
        let validator =
            StreakContinuityValidator::new("u1", db.clone(), clock, FreezeEconomy::default());
        let done = complete_session(&mut timer, &db, &validator, &XpConfig::default()).unwrap();
        (db, done)
    }

    #[test]
    fn long_session_extends_streak_and_earns_bonus() {
        let (db, done) = run(31);
        assert_eq!(done.xp_gained, 31 + 10);
        assert_eq!(done.streak_count, 1);
        assert_eq!(db.xp_balance("u1").unwrap(), 41);
        assert_eq!(db.recent_sessions("u1", 5).unwrap().len(), 1);
    }

    #[test]
    fn short_session_keeps_streak_unchanged() {
        let (db, done) = run(5);
        assert_eq!(done.xp_gained, 5);
        assert_eq!(done.streak_count, 0);
        assert_eq!(db.streak("u1").unwrap().current_streak, 0);
    }

    #[test]
    fn replayed_summary_earns_nothing() {
        let (db, done) = run(2);
        assert!(!db.record_session(&done.summary, 2).unwrap());
        assert_eq!(db.xp_balance("u1").unwrap(), 2);
    }

    #[test]
    fn failed_session_write_still_completes() {
        let (db, done) = run_with(40, |db| {
            db.conn()
                .execute_batch(
                    "CREATE TRIGGER fail_sessions BEFORE INSERT ON sessions
                     BEGIN SELECT RAISE(ABORT, 'transient'); END;",
                )
                .unwrap();
        });
        assert_eq!(done.summary.total_seconds, 40 * 60);
        assert!(!done.recorded);
        assert_eq!(done.xp_gained, 0);
        assert_eq!(db.xp_balance("u1").unwrap(), 0);
        // The ledger holds the minutes, so the day still counts.
        assert_eq!(done.streak_count, 1);
        assert_eq!(db.streak("u1").unwrap().current_streak, 1);
    }

    #[test]
    fn failed_streak_write_keeps_session_and_xp() {
        let (db, done) = run_with(40, |db| {
            db.conn()
                .execute_batch(
                    "CREATE TRIGGER fail_streak BEFORE UPDATE OF current_streak ON profiles
                     BEGIN SELECT RAISE(ABORT, 'transient'); END;",
                )
                .unwrap();
        });
        assert!(done.recorded);
        assert_eq!(done.xp_gained, 40 + 10);
        assert_eq!(done.streak_count, 0);
        assert_eq!(db.xp_balance("u1").unwrap(), 50);
        assert_eq!(db.recent_sessions("u1", 5).unwrap().len(), 1);
    }
}
