//! Database schema migrations for studioflow.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use indoc::indoc;
use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0)
    })
    .unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to read schema_version");
        None
    })
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// v1: key-value snapshot store, stage-time ledger, profiles, freeze usage
/// markers and completed sessions.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(indoc! {"
        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stage_time_records (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id          TEXT NOT NULL,
            session_id       TEXT,
            stage            TEXT NOT NULL,
            started_at       TEXT NOT NULL,
            ended_at         TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            content_item_id  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_stage_time_user_started
            ON stage_time_records(user_id, started_at);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id            TEXT PRIMARY KEY,
            timezone           TEXT NOT NULL DEFAULT 'UTC',
            daily_goal_minutes INTEGER NOT NULL DEFAULT 30,
            xp                 INTEGER NOT NULL DEFAULT 0,
            freezes            INTEGER NOT NULL DEFAULT 0,
            current_streak     INTEGER NOT NULL DEFAULT 0,
            longest_streak     INTEGER NOT NULL DEFAULT 0,
            last_event_date    TEXT
        );

        CREATE TABLE IF NOT EXISTS freeze_usage (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            day        TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, day)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id    TEXT NOT NULL UNIQUE,
            user_id       TEXT NOT NULL,
            content_id    TEXT,
            started_at    TEXT NOT NULL,
            ended_at      TEXT NOT NULL,
            total_seconds INTEGER NOT NULL,
            final_stage   TEXT NOT NULL,
            streak_mode   INTEGER NOT NULL DEFAULT 0,
            xp_awarded    INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user_ended ON sessions(user_id, ended_at);
    "})?;
    set_schema_version(conn, 1)
}

/// v2: trophy unlock markers (`shown_at` NULL = unlocked, not yet shown).
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(indoc! {"
        CREATE TABLE IF NOT EXISTS trophy_unlocks (
            user_id     TEXT NOT NULL,
            trophy_id   TEXT NOT NULL,
            unlocked_at TEXT NOT NULL,
            shown_at    TEXT,
            PRIMARY KEY (user_id, trophy_id)
        );
    "})?;
    set_schema_version(conn, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_database_to_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'trophy_unlocks'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}
