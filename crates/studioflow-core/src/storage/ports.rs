//! Interfaces to the collaborators this crate does not own.
//!
//! The timer, validator and sequencer only ever talk to these traits.
//! [`Database`](super::Database) implements every store trait; tests swap in
//! [`StaticIdentity`] and [`FixedClock`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::celebration::trophy::{StatsSnapshot, TrophyId, TrophyUnlock};
use crate::error::Result;
use crate::storage::config::ProfileConfig;
use crate::storage::database::Profile;
use crate::streak::{Streak, UserTimezone};
use crate::timer::StageTimeRecord;

/// Resolves the signed-in user.
pub trait IdentityProvider: Send + Sync {
    /// Stable user id, or `None` when nobody is signed in.
    fn current_user(&self) -> Option<String>;
}

/// Identity fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Identity from `[profile] user_id`, overridden by `STUDIOFLOW_USER`.
#[derive(Debug, Clone, Default)]
pub struct ConfigIdentity(Option<String>);

impl ConfigIdentity {
    pub fn from_config(profile: &ProfileConfig) -> Self {
        let user = std::env::var("STUDIOFLOW_USER")
            .ok()
            .or_else(|| profile.user_id.clone())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Self(user)
    }
}

impl IdentityProvider for ConfigIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Synchronous, crash-safe key-value storage for the timer snapshot.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Insert-only stage-time ledger.
pub trait LedgerStore: Send + Sync {
    /// Append one row and return its id.
    fn append_stage_time(&self, record: &StageTimeRecord) -> Result<i64>;
}

/// Streak, freeze, XP and profile fields of a user.
///
/// Every read goes to the store; callers never cache balances.
pub trait ProfileStore: Send + Sync {
    fn profile(&self, user_id: &str) -> Result<Profile>;
    fn streak(&self, user_id: &str) -> Result<Streak>;
    fn save_streak(&self, user_id: &str, streak: &Streak) -> Result<()>;
    fn freeze_balance(&self, user_id: &str) -> Result<u32>;
    /// Add `delta` (possibly negative) to the freeze balance, returning the new balance.
    fn adjust_freezes(&self, user_id: &str, delta: i64) -> Result<u32>;
    fn xp_balance(&self, user_id: &str) -> Result<i64>;
    /// Add `delta` (possibly negative) to the XP balance, returning the new balance.
    fn adjust_xp(&self, user_id: &str, delta: i64) -> Result<i64>;
    /// Spend one freeze per day in `days`, mark each day as covered and save
    /// `streak`, all or nothing. Returns the remaining balance.
    ///
    /// Fails with `InsufficientFreezes` without writing if the balance read
    /// inside the write is too small.
    fn recover_with_freezes(&self, user_id: &str, days: &[NaiveDate], streak: &Streak)
        -> Result<u32>;
}

/// Reads and markers backing the celebration screens.
pub trait CelebrationStore: Send + Sync {
    /// Ledger seconds per local calendar day in `from..=to`.
    fn daily_seconds(
        &self,
        user_id: &str,
        tz: &UserTimezone,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, u64>>;
    fn stats_snapshot(&self, user_id: &str) -> Result<StatsSnapshot>;
    fn trophy_unlocks(&self, user_id: &str) -> Result<Vec<TrophyUnlock>>;
    /// Persist an unlock. Returns `false` if the trophy was already unlocked.
    fn unlock_trophy(&self, user_id: &str, trophy: TrophyId, at: DateTime<Utc>) -> Result<bool>;
    fn mark_trophy_shown(&self, user_id: &str, trophy: TrophyId, at: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), start + Duration::minutes(90));
    }

    #[test]
    fn config_identity_ignores_blank_user() {
        let profile = ProfileConfig {
            user_id: Some("  ".into()),
            ..ProfileConfig::default()
        };
        if std::env::var_os("STUDIOFLOW_USER").is_none() {
            assert!(ConfigIdentity::from_config(&profile).current_user().is_none());
        }
    }

    #[test]
    fn static_identity() {
        assert_eq!(StaticIdentity::signed_in("u1").current_user().as_deref(), Some("u1"));
        assert!(StaticIdentity::anonymous().current_user().is_none());
    }
}
