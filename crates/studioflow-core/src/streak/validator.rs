//! Streak continuity validator.
//!
//! Reconciles a user's streak with the calendar: how many days went by
//! without a qualifying session, whether a background job already zeroed the
//! streak, and whether freezes (owned or bought with XP) can cover the gap.
//!
//! Balances are re-read from the store at the start of every operation; a
//! report from an earlier `check_lost_days` is never trusted for a write.
//!
//! The public recovery operations return booleans and log failures. The
//! `try_*` variants return the typed error for callers that want to show it.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::calendar::days_between;
use super::freeze::{FreezeEconomy, PurchaseQuote};
use super::record::Streak;
use crate::error::{CoreError, Result, ValidationError};
use crate::storage::{Clock, Profile, ProfileStore};

/// Result of comparing the streak record with today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostDaysReport {
    pub today: NaiveDate,
    pub streak: Streak,
    /// Days strictly between the last qualifying day and today.
    pub lost_days: u32,
    pub available_freezes: u32,
    pub can_use_freeze: bool,
    /// The streak was zeroed outside this crate.
    pub externally_reset: bool,
    /// Streak value a recovery restores.
    pub original_streak: u32,
    pub xp_balance: i64,
    /// Purchase needed to cover the gap, if one is possible at all.
    pub purchase: Option<PurchaseQuote>,
}

impl LostDaysReport {
    /// The calendar days a recovery covers, oldest first.
    pub fn lost_day_keys(&self) -> Vec<NaiveDate> {
        let Some(last) = self.streak.last_event_date else {
            return Vec::new();
        };
        (1..=i64::from(self.lost_days))
            .map(|offset| last + Duration::days(offset))
            .collect()
    }

    pub fn can_buy_freezes(&self) -> bool {
        self.purchase
            .map(|quote| quote.to_buy > 0 && self.xp_balance >= quote.total_cost)
            .unwrap_or(false)
    }
}

/// What a successful freeze recovery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReceipt {
    pub days_covered: Vec<NaiveDate>,
    pub freezes_remaining: u32,
    pub streak: Streak,
}

/// One completed step of the buy-and-recover sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PurchaseStep {
    XpDebited { amount: i64, xp_balance: i64 },
    FreezesCredited { amount: u32, freeze_balance: u32 },
    StreakRecovered { receipt: RecoveryReceipt },
}

/// Step that failed after earlier steps had already been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFailure {
    pub step: String,
    pub error: String,
}

/// Trail of the buy-and-recover sequence.
///
/// The steps touch independent records without a shared transaction, so a
/// failure midway leaves the earlier steps applied. `failure` says where it
/// stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReport {
    pub quote: PurchaseQuote,
    pub steps: Vec<PurchaseStep>,
    pub failure: Option<PurchaseFailure>,
}

impl PurchaseReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of registering a session's minutes against the daily goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    pub streak: Streak,
    /// Today became a new qualifying day with this call.
    pub extended: bool,
}

pub struct StreakContinuityValidator {
    user_id: String,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    economy: FreezeEconomy,
}

impl StreakContinuityValidator {
    pub fn new(
        user_id: impl Into<String>,
        profiles: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
        economy: FreezeEconomy,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            profiles,
            clock,
            economy,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn economy(&self) -> &FreezeEconomy {
        &self.economy
    }

    /// Compare the stored streak with today in the user's timezone.
    pub fn check_lost_days(&self) -> Result<LostDaysReport> {
        let profile = self.profiles.profile(&self.user_id)?;
        Ok(self.assess(&profile))
    }

    /// Cover the lost days with owned freezes.
    pub fn use_freezes_to_recover(&self) -> bool {
        match self.try_use_freezes_to_recover() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "freeze recovery failed");
                false
            }
        }
    }

    /// Buy the missing freezes with XP, then cover the lost days.
    pub fn buy_freezes_and_recover(&self) -> bool {
        match self.try_buy_freezes_and_recover() {
            Ok(report) => report.is_complete(),
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "freeze purchase rejected");
                false
            }
        }
    }

    /// Give up on the streak.
    pub fn reset_streak(&self) -> bool {
        match self.try_reset_streak() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "streak reset failed");
                false
            }
        }
    }

    /// Validation failures leave every record untouched.
    pub fn try_use_freezes_to_recover(&self) -> Result<RecoveryReceipt> {
        let report = self.check_lost_days()?;
        if report.lost_days == 0 {
            return Err(ValidationError::NothingToRecover.into());
        }
        if report.available_freezes < report.lost_days {
            return Err(ValidationError::InsufficientFreezes {
                available: report.available_freezes,
                required: report.lost_days,
            }
            .into());
        }
        self.consume_freezes(&report)
    }

    /// Validation failures happen before any write. Once the XP debit went
    /// through, later failures are reported in the returned trail instead of
    /// rolled back.
    pub fn try_buy_freezes_and_recover(&self) -> Result<PurchaseReport> {
        let profile = self.profiles.profile(&self.user_id)?;
        let report = self.assess(&profile);
        let quote = self.economy.quote(
            report.available_freezes,
            report.lost_days,
            profile.daily_goal_minutes,
        )?;
        if profile.xp < quote.total_cost {
            return Err(ValidationError::InsufficientXp {
                available: profile.xp,
                required: quote.total_cost,
            }
            .into());
        }

        let mut trail = PurchaseReport {
            quote,
            steps: Vec::new(),
            failure: None,
        };

        if quote.to_buy > 0 {
            // Nothing has been written yet, so a failed debit is a plain error.
            let xp_balance = self.profiles.adjust_xp(&self.user_id, -quote.total_cost)?;
            tracing::info!(
                user_id = %self.user_id,
                amount = quote.total_cost,
                xp_balance,
                "freeze purchase: xp debited"
            );
            trail.steps.push(PurchaseStep::XpDebited {
                amount: quote.total_cost,
                xp_balance,
            });

            match self
                .profiles
                .adjust_freezes(&self.user_id, i64::from(quote.to_buy))
            {
                Ok(freeze_balance) => {
                    tracing::info!(
                        user_id = %self.user_id,
                        amount = quote.to_buy,
                        freeze_balance,
                        "freeze purchase: freezes credited"
                    );
                    trail.steps.push(PurchaseStep::FreezesCredited {
                        amount: quote.to_buy,
                        freeze_balance,
                    });
                }
                Err(e) => return Ok(self.partial(trail, "credit_freezes", e)),
            }
        }

        let funded = LostDaysReport {
            available_freezes: report.available_freezes + quote.to_buy,
            ..report
        };
        match self.consume_freezes(&funded) {
            Ok(receipt) => trail.steps.push(PurchaseStep::StreakRecovered { receipt }),
            Err(e) => return Ok(self.partial(trail, "consume_freezes", e)),
        }
        Ok(trail)
    }

    pub fn try_reset_streak(&self) -> Result<Streak> {
        let mut streak = self.profiles.streak(&self.user_id)?;
        streak.current_streak = 0;
        streak.last_event_date = None;
        self.profiles.save_streak(&self.user_id, &streak)?;
        tracing::info!(user_id = %self.user_id, "streak reset");
        Ok(streak)
    }

    /// Count today as a qualifying day if `minutes_today` meets the goal.
    pub fn register_qualifying_day(&self, minutes_today: u64) -> Result<StreakUpdate> {
        let profile = self.profiles.profile(&self.user_id)?;
        let mut streak = profile.streak;
        if minutes_today < u64::from(profile.daily_goal_minutes) {
            return Ok(StreakUpdate {
                streak,
                extended: false,
            });
        }

        let today = profile.timezone.day_key(self.clock.now());
        let next = match streak.last_event_date {
            Some(last) if last >= today => {
                return Ok(StreakUpdate {
                    streak,
                    extended: false,
                })
            }
            Some(last) if days_between(&profile.timezone, last, today) == 1 => {
                streak.current_streak + 1
            }
            _ => 1,
        };
        streak.set_current(next);
        streak.last_event_date = Some(today);
        self.profiles.save_streak(&self.user_id, &streak)?;
        tracing::info!(user_id = %self.user_id, current_streak = next, "qualifying day registered");
        Ok(StreakUpdate {
            streak,
            extended: true,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn assess(&self, profile: &Profile) -> LostDaysReport {
        let today = profile.timezone.day_key(self.clock.now());
        let streak = profile.streak;

        let lost_days = match streak.last_event_date {
            None => 0,
            Some(last) => {
                let diff = days_between(&profile.timezone, last, today);
                if diff <= 1 {
                    0
                } else {
                    u32::try_from(diff - 1).unwrap_or(u32::MAX)
                }
            }
        };

        let externally_reset =
            streak.current_streak == 0 && streak.longest_streak > 0 && lost_days > 0;
        let original_streak = if externally_reset {
            streak.longest_streak
        } else {
            streak.current_streak
        };
        let purchase = self
            .economy
            .quote(profile.freezes, lost_days, profile.daily_goal_minutes)
            .ok();

        LostDaysReport {
            today,
            streak,
            lost_days,
            available_freezes: profile.freezes,
            can_use_freeze: profile.freezes >= lost_days && lost_days > 0,
            externally_reset,
            original_streak,
            xp_balance: profile.xp,
            purchase,
        }
    }

    /// Mark each lost day, spend the freezes and restore the streak in one
    /// store write. The balance is checked again inside that write.
    fn consume_freezes(&self, report: &LostDaysReport) -> Result<RecoveryReceipt> {
        let days = report.lost_day_keys();
        let mut streak = report.streak;
        streak.last_event_date = Some(report.today - Duration::days(1));
        if report.externally_reset {
            streak.set_current(report.original_streak);
        }
        let freezes_remaining = self
            .profiles
            .recover_with_freezes(&self.user_id, &days, &streak)?;

        tracing::info!(
            user_id = %self.user_id,
            days = days.len(),
            freezes_remaining,
            current_streak = streak.current_streak,
            "streak recovered with freezes"
        );
        Ok(RecoveryReceipt {
            days_covered: days,
            freezes_remaining,
            streak,
        })
    }

    fn partial(&self, mut trail: PurchaseReport, step: &str, error: CoreError) -> PurchaseReport {
        tracing::error!(
            user_id = %self.user_id,
            step,
            completed = trail.steps.len(),
            error = %error,
            "freeze purchase stopped partway; earlier steps remain applied"
        );
        trail.failure = Some(PurchaseFailure {
            step: step.to_string(),
            error: error.to_string(),
        });
        trail
    }
}
