//! Trophies and the post-session celebration sequence.

mod sequencer;
pub mod trophy;

pub use sequencer::{
    pending_trophies, week_calendar, BackgroundLoad, CelebrationSequencer, CelebrationStage,
    CelebrationView, DayCompletion,
};
pub use trophy::{evaluate, StatsSnapshot, TrophyId, TrophyUnlock};
