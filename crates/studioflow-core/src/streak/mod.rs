//! Daily streaks, freezes and the continuity validator.

pub mod calendar;
mod freeze;
mod record;
mod validator;

pub use calendar::UserTimezone;
pub use freeze::{FreezeEconomy, PurchaseQuote};
pub use record::Streak;
pub use validator::{
    LostDaysReport, PurchaseFailure, PurchaseReport, PurchaseStep, RecoveryReceipt,
    StreakContinuityValidator, StreakUpdate,
};
