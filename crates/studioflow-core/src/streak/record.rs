use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A user's streak record.
///
/// `longest_streak >= current_streak` holds after every operation in this
/// crate. A zero `current_streak` next to a non-zero `longest_streak` and a
/// gap since `last_event_date` means something outside this crate reset it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Streak {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_event_date: Option<NaiveDate>,
}

impl Streak {
    pub fn new(current_streak: u32, longest_streak: u32, last_event_date: Option<NaiveDate>) -> Self {
        Self {
            current_streak,
            longest_streak: longest_streak.max(current_streak),
            last_event_date,
        }
    }

    /// Set the current streak, lifting the longest streak if needed.
    pub fn set_current(&mut self, value: u32) {
        self.current_streak = value;
        self.longest_streak = self.longest_streak.max(value);
    }
}
