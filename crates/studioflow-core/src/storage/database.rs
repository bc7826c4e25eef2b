//! SQLite-backed storage.
//!
//! Provides persistent storage for:
//! - The stage-time ledger (insert-only)
//! - Profiles: timezone, daily goal, XP, freezes and streak
//! - Freeze usage markers and trophy unlock markers
//! - Completed sessions
//! - Key-value store for the timer snapshot

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::config::ProfileConfig;
use super::data_dir;
use super::migrations;
use super::ports::{CelebrationStore, LedgerStore, ProfileStore, SnapshotStore};
use crate::celebration::trophy::{StatsSnapshot, TrophyId, TrophyUnlock};
use crate::error::{CoreError, DatabaseError, Result, ValidationError};
use crate::streak::calendar::{format_day_key, parse_day_key};
use crate::streak::{Streak, UserTimezone};
use crate::timer::{SessionSummary, Stage, StageTimeRecord};

/// Profile fields this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub timezone: UserTimezone,
    pub daily_goal_minutes: u32,
    pub xp: i64,
    pub freezes: u32,
    pub streak: Streak,
}

/// A completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub content_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_seconds: u64,
    pub final_stage: Stage,
    pub streak_mode: bool,
    pub xp_awarded: i64,
}

/// SQLite database implementing every store port.
///
/// The connection sits behind a mutex so one `Arc<Database>` can serve the
/// timer driver and background loads at once.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Lock and return the underlying SQLite connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the database at `<data_dir>/studioflow.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("studioflow.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Key-value ────────────────────────────────────────────────────

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    // ── Profiles ─────────────────────────────────────────────────────

    /// Create the profile with `defaults` unless it exists, then return it.
    pub fn ensure_profile(&self, user_id: &str, defaults: &ProfileConfig) -> Result<Profile> {
        self.conn().execute(
            "INSERT OR IGNORE INTO profiles (user_id, timezone, daily_goal_minutes)
             VALUES (?1, ?2, ?3)",
            params![
                user_id,
                defaults.timezone.to_string(),
                defaults.daily_goal_minutes
            ],
        )?;
        self.profile(user_id)
    }

    pub fn update_profile_settings(
        &self,
        user_id: &str,
        timezone: Option<UserTimezone>,
        daily_goal_minutes: Option<u32>,
    ) -> Result<Profile> {
        {
            let conn = self.conn();
            if let Some(tz) = timezone {
                conn.execute(
                    "UPDATE profiles SET timezone = ?2 WHERE user_id = ?1",
                    params![user_id, tz.to_string()],
                )?;
            }
            if let Some(goal) = daily_goal_minutes {
                conn.execute(
                    "UPDATE profiles SET daily_goal_minutes = ?2 WHERE user_id = ?1",
                    params![user_id, goal],
                )?;
            }
        }
        self.profile(user_id)
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Record a completed session and credit its XP in one transaction.
    ///
    /// Returns `false`, crediting nothing, if the session was already
    /// recorded. A failed credit rolls back the row, so a retry still awards.
    pub fn record_session(&self, summary: &SessionSummary, xp_awarded: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO sessions
                (session_id, user_id, content_id, started_at, ended_at,
                 total_seconds, final_stage, streak_mode, xp_awarded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                summary.session_id.to_string(),
                summary.user_id,
                summary.content_id,
                ts(summary.started_at),
                ts(summary.ended_at),
                summary.total_seconds,
                summary.final_stage.as_str(),
                summary.streak_mode,
                xp_awarded,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        if xp_awarded != 0 {
            let changed = tx.execute(
                "UPDATE profiles SET xp = xp + ?2 WHERE user_id = ?1",
                params![summary.user_id, xp_awarded],
            )?;
            if changed == 0 {
                return Err(DatabaseError::ProfileMissing(summary.user_id.clone()).into());
            }
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn recent_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_id, content_id, started_at, ended_at,
                    total_seconds, final_stage, streak_mode, xp_awarded
             FROM sessions WHERE user_id = ?1
             ORDER BY ended_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                user_id: row.get(2)?,
                content_id: row.get(3)?,
                started_at: parse_ts(4, &row.get::<_, String>(4)?)?,
                ended_at: parse_ts(5, &row.get::<_, String>(5)?)?,
                total_seconds: row.get(6)?,
                final_stage: parse_col(7, &row.get::<_, String>(7)?)?,
                streak_mode: row.get(8)?,
                xp_awarded: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Ledger reads ─────────────────────────────────────────────────

    /// All ledger rows of a user, oldest first.
    pub fn stage_time_rows(&self, user_id: &str) -> Result<Vec<StageTimeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, session_id, stage, started_at, ended_at,
                    duration_seconds, content_item_id
             FROM stage_time_records WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let session_id = row
                .get::<_, Option<String>>(1)?
                .map(|raw| parse_col::<uuid::Uuid>(1, &raw))
                .transpose()?;
            Ok(StageTimeRecord {
                user_id: row.get(0)?,
                session_id,
                stage: parse_col(2, &row.get::<_, String>(2)?)?,
                started_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                ended_at: parse_ts(4, &row.get::<_, String>(4)?)?,
                duration_seconds: row.get(5)?,
                content_item_id: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Days covered by a freeze, oldest first.
    pub fn freeze_usage_days(&self, user_id: &str) -> Result<Vec<NaiveDate>> {
        let raw: Vec<String> = {
            let conn = self.conn();
            let mut stmt =
                conn.prepare("SELECT day FROM freeze_usage WHERE user_id = ?1 ORDER BY day")?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raw.iter()
            .map(|day| parse_day_key(day).map_err(CoreError::from))
            .collect()
    }

    fn changed_or_missing(&self, changed: usize, user_id: &str) -> Result<()> {
        if changed == 0 {
            return Err(DatabaseError::ProfileMissing(user_id.to_string()).into());
        }
        Ok(())
    }
}

impl SnapshotStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv_get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.kv_set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.kv_remove(key)
    }
}

impl LedgerStore for Database {
    fn append_stage_time(&self, record: &StageTimeRecord) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stage_time_records
                (user_id, session_id, stage, started_at, ended_at, duration_seconds, content_item_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.user_id,
                record.session_id.map(|id| id.to_string()),
                record.stage.as_str(),
                ts(record.started_at),
                ts(record.ended_at),
                record.duration_seconds,
                record.content_item_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl ProfileStore for Database {
    fn profile(&self, user_id: &str) -> Result<Profile> {
        let row = self
            .conn()
            .query_row(
                "SELECT timezone, daily_goal_minutes, xp, freezes,
                        current_streak, longest_streak, last_event_date
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((tz, goal, xp, freezes, current, longest, last_event)) = row else {
            return Err(DatabaseError::ProfileMissing(user_id.to_string()).into());
        };
        let last_event_date = last_event.as_deref().map(parse_day_key).transpose()?;
        Ok(Profile {
            user_id: user_id.to_string(),
            timezone: tz.parse()?,
            daily_goal_minutes: goal,
            xp,
            freezes,
            streak: Streak {
                current_streak: current,
                longest_streak: longest,
                last_event_date,
            },
        })
    }

    fn streak(&self, user_id: &str) -> Result<Streak> {
        Ok(self.profile(user_id)?.streak)
    }

    fn save_streak(&self, user_id: &str, streak: &Streak) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE profiles
             SET current_streak = ?2, longest_streak = ?3, last_event_date = ?4
             WHERE user_id = ?1",
            params![
                user_id,
                streak.current_streak,
                streak.longest_streak,
                streak.last_event_date.map(format_day_key),
            ],
        )?;
        self.changed_or_missing(changed, user_id)
    }

    fn freeze_balance(&self, user_id: &str) -> Result<u32> {
        let balance = self
            .conn()
            .query_row(
                "SELECT freezes FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        balance.ok_or_else(|| DatabaseError::ProfileMissing(user_id.to_string()).into())
    }

    fn adjust_freezes(&self, user_id: &str, delta: i64) -> Result<u32> {
        let changed = self.conn().execute(
            "UPDATE profiles SET freezes = MAX(0, freezes + ?2) WHERE user_id = ?1",
            params![user_id, delta],
        )?;
        self.changed_or_missing(changed, user_id)?;
        self.freeze_balance(user_id)
    }

    fn xp_balance(&self, user_id: &str) -> Result<i64> {
        let balance = self
            .conn()
            .query_row(
                "SELECT xp FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        balance.ok_or_else(|| DatabaseError::ProfileMissing(user_id.to_string()).into())
    }

    fn adjust_xp(&self, user_id: &str, delta: i64) -> Result<i64> {
        let changed = self.conn().execute(
            "UPDATE profiles SET xp = xp + ?2 WHERE user_id = ?1",
            params![user_id, delta],
        )?;
        self.changed_or_missing(changed, user_id)?;
        self.xp_balance(user_id)
    }

    fn recover_with_freezes(
        &self,
        user_id: &str,
        days: &[NaiveDate],
        streak: &Streak,
    ) -> Result<u32> {
        let required = u32::try_from(days.len()).unwrap_or(u32::MAX);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let available = tx
            .query_row(
                "SELECT freezes FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?
            .ok_or_else(|| DatabaseError::ProfileMissing(user_id.to_string()))?;
        if available < required {
            return Err(ValidationError::InsufficientFreezes {
                available,
                required,
            }
            .into());
        }

        let created_at = ts(Utc::now());
        for day in days {
            tx.execute(
                "INSERT OR IGNORE INTO freeze_usage (user_id, day, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, format_day_key(*day), created_at],
            )?;
        }
        tx.execute(
            "UPDATE profiles
             SET freezes = freezes - ?2,
                 current_streak = ?3, longest_streak = ?4, last_event_date = ?5
             WHERE user_id = ?1",
            params![
                user_id,
                required,
                streak.current_streak,
                streak.longest_streak,
                streak.last_event_date.map(format_day_key),
            ],
        )?;
        tx.commit()?;
        Ok(available - required)
    }
}

impl CelebrationStore for Database {
    fn daily_seconds(
        &self,
        user_id: &str,
        tz: &UserTimezone,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, u64>> {
        let window_start = tz.start_of(from);
        let window_end = tz.start_of(to) + Duration::days(1);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT started_at, duration_seconds FROM stage_time_records
             WHERE user_id = ?1 AND started_at >= ?2 AND started_at < ?3",
        )?;
        let rows = stmt.query_map(params![user_id, ts(window_start), ts(window_end)], |row| {
            Ok((parse_ts(0, &row.get::<_, String>(0)?)?, row.get::<_, u64>(1)?))
        })?;

        let mut days = BTreeMap::new();
        for row in rows {
            let (started_at, seconds) = row?;
            *days.entry(tz.day_key(started_at)).or_insert(0) += seconds;
        }
        Ok(days)
    }

    fn stats_snapshot(&self, user_id: &str) -> Result<StatsSnapshot> {
        let mut stats = StatsSnapshot::default();
        {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT stage, COALESCE(SUM(duration_seconds), 0)
                 FROM stage_time_records WHERE user_id = ?1 GROUP BY stage",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((parse_col::<Stage>(0, &row.get::<_, String>(0)?)?, row.get::<_, u64>(1)?))
            })?;
            for row in rows {
                let (stage, seconds) = row?;
                stats.total_seconds += seconds;
                stats.seconds_by_stage.insert(stage, seconds);
            }

            let (sessions, streak_sessions) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(streak_mode), 0) FROM sessions WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
            )?;
            stats.sessions_completed = sessions;
            stats.streak_mode_sessions = streak_sessions;
        }

        match self.streak(user_id) {
            Ok(streak) => {
                stats.current_streak = streak.current_streak;
                stats.longest_streak = streak.longest_streak;
            }
            Err(CoreError::Database(DatabaseError::ProfileMissing(_))) => {}
            Err(e) => return Err(e),
        }
        Ok(stats)
    }

    fn trophy_unlocks(&self, user_id: &str) -> Result<Vec<TrophyUnlock>> {
        let raw: Vec<(String, String, Option<String>)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT trophy_id, unlocked_at, shown_at FROM trophy_unlocks
                 WHERE user_id = ?1 ORDER BY unlocked_at, trophy_id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut unlocks = Vec::with_capacity(raw.len());
        for (trophy, unlocked_at, shown_at) in raw {
            let Ok(trophy) = trophy.parse::<TrophyId>() else {
                tracing::warn!(trophy = %trophy, "skipping unknown trophy id");
                continue;
            };
            unlocks.push(TrophyUnlock {
                trophy,
                unlocked_at: parse_ts(1, &unlocked_at)?,
                shown_at: shown_at.as_deref().map(|s| parse_ts(2, s)).transpose()?,
            });
        }
        Ok(unlocks)
    }

    fn unlock_trophy(&self, user_id: &str, trophy: TrophyId, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO trophy_unlocks (user_id, trophy_id, unlocked_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, trophy.as_str(), ts(at)],
        )?;
        Ok(inserted == 1)
    }

    fn mark_trophy_shown(&self, user_id: &str, trophy: TrophyId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE trophy_unlocks SET shown_at = ?3
             WHERE user_id = ?1 AND trophy_id = ?2 AND shown_at IS NULL",
            params![user_id, trophy.as_str(), ts(at)],
        )?;
        Ok(())
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_col<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, h, m, 0).unwrap()
    }

    fn record(stage: Stage, start: DateTime<Utc>, secs: u64) -> StageTimeRecord {
        StageTimeRecord {
            user_id: "u1".into(),
            session_id: Some(uuid::Uuid::new_v4()),
            stage,
            started_at: start,
            ended_at: start + Duration::seconds(secs as i64),
            duration_seconds: secs,
            content_item_id: Some("c1".into()),
        }
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        db.kv_remove("test").unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
    }

    #[test]
    fn ledger_rows_round_trip() {
        let db = Database::open_memory().unwrap();
        let row = record(Stage::Script, at(9, 0), 90);
        db.append_stage_time(&row).unwrap();
        assert_eq!(db.stage_time_rows("u1").unwrap(), vec![row]);
        assert!(db.stage_time_rows("someone-else").unwrap().is_empty());
    }

    #[test]
    fn profile_is_created_once_with_defaults() {
        let db = Database::open_memory().unwrap();
        let defaults = ProfileConfig {
            timezone: "+02:00".parse().unwrap(),
            daily_goal_minutes: 45,
            ..ProfileConfig::default()
        };
        let profile = db.ensure_profile("u1", &defaults).unwrap();
        assert_eq!(profile.daily_goal_minutes, 45);
        assert_eq!(profile.timezone.to_string(), "+02:00");

        db.update_profile_settings("u1", None, Some(60)).unwrap();
        let again = db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        assert_eq!(again.daily_goal_minutes, 60);
        assert_eq!(again.timezone.to_string(), "+02:00");
    }

    #[test]
    fn missing_profile_is_reported() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            db.freeze_balance("ghost"),
            Err(CoreError::Database(DatabaseError::ProfileMissing(_)))
        ));
        assert!(db.adjust_xp("ghost", 10).is_err());
    }

    #[test]
    fn balances_adjust_and_freezes_floor_at_zero() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        assert_eq!(db.adjust_xp("u1", 250).unwrap(), 250);
        assert_eq!(db.adjust_xp("u1", -100).unwrap(), 150);
        assert_eq!(db.adjust_freezes("u1", 2).unwrap(), 2);
        assert_eq!(db.adjust_freezes("u1", -5).unwrap(), 0);
    }

    #[test]
    fn freeze_recovery_marks_days_once() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        db.adjust_freezes("u1", 3).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let streak = Streak::new(5, 5, Some(day));

        assert_eq!(db.recover_with_freezes("u1", &[day], &streak).unwrap(), 2);
        assert_eq!(db.recover_with_freezes("u1", &[day], &streak).unwrap(), 1);
        assert_eq!(db.freeze_usage_days("u1").unwrap(), vec![day]);
        assert_eq!(db.streak("u1").unwrap(), streak);
    }

    #[test]
    fn freeze_recovery_rolls_back_as_a_whole() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        db.adjust_freezes("u1", 2).unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER fail_streak BEFORE UPDATE OF last_event_date ON profiles
                 BEGIN SELECT RAISE(ABORT, 'transient'); END;",
            )
            .unwrap();
        let days = [
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        ];
        let streak = Streak::new(5, 5, Some(days[1]));

        assert!(db.recover_with_freezes("u1", &days, &streak).is_err());
        assert_eq!(db.freeze_balance("u1").unwrap(), 2);
        assert!(db.freeze_usage_days("u1").unwrap().is_empty());
        assert_eq!(db.streak("u1").unwrap(), Streak::default());
    }

    #[test]
    fn freeze_recovery_checks_balance_before_writing() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(matches!(
            db.recover_with_freezes("u1", &[day], &Streak::default()),
            Err(CoreError::Validation(ValidationError::InsufficientFreezes {
                available: 0,
                required: 1
            }))
        ));
        assert!(db.freeze_usage_days("u1").unwrap().is_empty());
    }

    #[test]
    fn session_row_and_xp_commit_together() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        let summary = SessionSummary {
            session_id: uuid::Uuid::new_v4(),
            user_id: "u1".into(),
            content_id: None,
            started_at: at(9, 0),
            ended_at: at(9, 40),
            total_seconds: 2400,
            final_stage: Stage::Edit,
            stage_totals: BTreeMap::new(),
            streak_mode: true,
            daily_goal_minutes: 30,
        };
        db.conn()
            .execute_batch(
                "CREATE TRIGGER fail_xp BEFORE UPDATE OF xp ON profiles
                 BEGIN SELECT RAISE(ABORT, 'transient'); END;",
            )
            .unwrap();
        assert!(db.record_session(&summary, 50).is_err());
        assert!(db.recent_sessions("u1", 5).unwrap().is_empty());

        db.conn().execute_batch("DROP TRIGGER fail_xp;").unwrap();
        assert!(db.record_session(&summary, 50).unwrap());
        assert_eq!(db.xp_balance("u1").unwrap(), 50);
        assert!(!db.record_session(&summary, 50).unwrap());
        assert_eq!(db.xp_balance("u1").unwrap(), 50);
    }

    #[test]
    fn streak_round_trip() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        let streak = Streak::new(4, 9, NaiveDate::from_ymd_opt(2024, 3, 30));
        db.save_streak("u1", &streak).unwrap();
        assert_eq!(db.streak("u1").unwrap(), streak);
    }

    #[test]
    fn daily_seconds_buckets_by_local_day() {
        let db = Database::open_memory().unwrap();
        // 23:30 UTC on Apr 1 is already Apr 2 at +02:00.
        db.append_stage_time(&record(Stage::Idea, Utc.with_ymd_and_hms(2024, 4, 1, 23, 30, 0).unwrap(), 600))
            .unwrap();
        db.append_stage_time(&record(Stage::Edit, at(10, 0), 300)).unwrap();
        let tz: UserTimezone = "+02:00".parse().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let days = db.daily_seconds("u1", &tz, day, day).unwrap();
        assert_eq!(days.get(&day), Some(&900));
    }

    #[test]
    fn stats_snapshot_aggregates_ledger_and_sessions() {
        let db = Database::open_memory().unwrap();
        db.ensure_profile("u1", &ProfileConfig::default()).unwrap();
        db.append_stage_time(&record(Stage::Idea, at(9, 0), 120)).unwrap();
        db.append_stage_time(&record(Stage::Idea, at(9, 5), 30)).unwrap();
        db.append_stage_time(&record(Stage::Record, at(9, 10), 50)).unwrap();
        let summary = SessionSummary {
            session_id: uuid::Uuid::new_v4(),
            user_id: "u1".into(),
            content_id: None,
            started_at: at(9, 0),
            ended_at: at(9, 30),
            total_seconds: 200,
            final_stage: Stage::Record,
            stage_totals: BTreeMap::new(),
            streak_mode: true,
            daily_goal_minutes: 30,
        };
        assert!(db.record_session(&summary, 13).unwrap());
        assert!(!db.record_session(&summary, 13).unwrap());

        let stats = db.stats_snapshot("u1").unwrap();
        assert_eq!(stats.total_seconds, 200);
        assert_eq!(stats.seconds_by_stage.get(&Stage::Idea), Some(&150));
        assert_eq!(stats.sessions_completed, 1);
        assert_eq!(stats.streak_mode_sessions, 1);
        assert_eq!(db.recent_sessions("u1", 5).unwrap()[0].xp_awarded, 13);
    }

    #[test]
    fn trophy_unlock_then_shown() {
        let db = Database::open_memory().unwrap();
        assert!(db.unlock_trophy("u1", TrophyId::FirstSession, at(9, 0)).unwrap());
        assert!(!db.unlock_trophy("u1", TrophyId::FirstSession, at(9, 1)).unwrap());
        let unlocks = db.trophy_unlocks("u1").unwrap();
        assert_eq!(unlocks.len(), 1);
        assert!(unlocks[0].shown_at.is_none());

        db.mark_trophy_shown("u1", TrophyId::FirstSession, at(9, 2)).unwrap();
        assert_eq!(db.trophy_unlocks("u1").unwrap()[0].shown_at, Some(at(9, 2)));
    }
}
