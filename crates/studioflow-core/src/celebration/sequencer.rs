//! Post-session celebration sequence.
//!
//! `Idle → SessionSummary → [StreakCelebration] → Trophy×N → Idle`
//!
//! The summary is shown synchronously by [`CelebrationSequencer::trigger`].
//! The week calendar and trophy queue load on a blocking task and merge into
//! whatever is on screen when they arrive. Every trigger bumps a generation
//! number and a load only merges into its own generation.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::trophy::{newly_unlocked, TrophyId};
use crate::error::Result;
use crate::storage::{CelebrationStore, Clock};
use crate::streak::UserTimezone;
use crate::timer::SessionSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationStage {
    #[default]
    Idle,
    SessionSummary,
    StreakCelebration,
    Trophy,
}

impl CelebrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CelebrationStage::Idle => "idle",
            CelebrationStage::SessionSummary => "session_summary",
            CelebrationStage::StreakCelebration => "streak_celebration",
            CelebrationStage::Trophy => "trophy",
        }
    }
}

/// One day of the week calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCompletion {
    pub day: NaiveDate,
    pub minutes: u64,
    pub goal_met: bool,
}

/// Data fetched behind the summary screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundLoad {
    /// Monday through Sunday of the current week.
    pub week: Vec<DayCompletion>,
    /// Unlocked but not yet shown, oldest first.
    pub trophies: Vec<TrophyId>,
}

/// Read-only rendering of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelebrationView {
    pub generation: u64,
    pub stage: CelebrationStage,
    pub summary: Option<SessionSummary>,
    pub streak_count: u32,
    pub xp_gained: i64,
    pub week: Vec<DayCompletion>,
    pub current_trophy: Option<TrophyId>,
    pub queued_trophies: usize,
    pub loading: bool,
}

type OnComplete = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct SequenceState {
    generation: u64,
    stage: CelebrationStage,
    summary: Option<SessionSummary>,
    streak_count: u32,
    xp_gained: i64,
    week: Vec<DayCompletion>,
    trophies: VecDeque<TrophyId>,
    current_trophy: Option<TrophyId>,
    loading: bool,
    on_complete: Option<OnComplete>,
}

impl SequenceState {
    /// Move to the next non-empty stage.
    fn advance(&mut self) {
        self.stage = match self.stage {
            CelebrationStage::SessionSummary if self.streak_count > 0 => {
                CelebrationStage::StreakCelebration
            }
            CelebrationStage::Idle => CelebrationStage::Idle,
            _ => match self.trophies.pop_front() {
                Some(trophy) => {
                    self.current_trophy = Some(trophy);
                    CelebrationStage::Trophy
                }
                None => {
                    self.current_trophy = None;
                    CelebrationStage::Idle
                }
            },
        };
    }
}

struct Inner {
    state: Mutex<SequenceState>,
    store: Arc<dyn CelebrationStore>,
    clock: Arc<dyn Clock>,
    user_id: String,
    timezone: UserTimezone,
    daily_goal_minutes: u32,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct CelebrationSequencer {
    inner: Arc<Inner>,
}

impl CelebrationSequencer {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn CelebrationStore>,
        clock: Arc<dyn Clock>,
        timezone: UserTimezone,
        daily_goal_minutes: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SequenceState::default()),
                store,
                clock,
                user_id: user_id.into(),
                timezone,
                daily_goal_minutes,
            }),
        }
    }

    pub fn stage(&self) -> CelebrationStage {
        self.inner.lock().stage
    }

    pub fn state(&self) -> CelebrationView {
        let state = self.inner.lock();
        CelebrationView {
            generation: state.generation,
            stage: state.stage,
            summary: state.summary.clone(),
            streak_count: state.streak_count,
            xp_gained: state.xp_gained,
            week: state.week.clone(),
            current_trophy: state.current_trophy,
            queued_trophies: state.trophies.len(),
            loading: state.loading,
        }
    }

    /// Show the summary now and start the background load.
    ///
    /// A sequence still on screen is replaced; its completion callback runs
    /// first so nothing waiting on it is left hanging. Must be called from
    /// within a tokio runtime.
    pub fn trigger<F>(
        &self,
        summary: SessionSummary,
        streak_count: u32,
        xp_gained: i64,
        on_complete: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (generation, superseded) = {
            let mut state = self.inner.lock();
            let superseded = state.on_complete.take();
            let generation = state.generation + 1;
            *state = SequenceState {
                generation,
                stage: CelebrationStage::SessionSummary,
                summary: Some(summary),
                streak_count,
                xp_gained,
                loading: true,
                on_complete: Some(Box::new(on_complete)),
                ..SequenceState::default()
            };
            (generation, superseded)
        };
        if let Some(callback) = superseded {
            tracing::debug!(generation, "celebration superseded by a new trigger");
            callback();
        }
        tracing::info!(
            user_id = %self.inner.user_id,
            generation,
            streak_count,
            xp_gained,
            "celebration started"
        );

        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let result = this.load_background();
            this.merge_background(generation, result);
        })
    }

    /// Merge a background load into the sequence it was started for.
    pub fn merge_background(&self, generation: u64, result: Result<BackgroundLoad>) {
        let mut state = self.inner.lock();
        if state.generation != generation {
            tracing::debug!(
                generation,
                current = state.generation,
                "ignoring stale celebration load"
            );
            return;
        }
        state.loading = false;

        let load = match result {
            Ok(load) => load,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.inner.user_id,
                    error = %e,
                    "celebration load failed; continuing without week or trophies"
                );
                BackgroundLoad::default()
            }
        };
        state.week = load.week;
        if state.stage == CelebrationStage::Idle {
            // Already dismissed. The unshown trophies wait for the next trigger.
            return;
        }
        for trophy in load.trophies {
            if state.current_trophy != Some(trophy) && !state.trophies.contains(&trophy) {
                state.trophies.push_back(trophy);
            }
        }
    }

    /// Advance past `current`. Returns the stage now on screen.
    ///
    /// A dismissal for a stage that is no longer showing is ignored.
    pub fn dismiss(&self, current: CelebrationStage) -> CelebrationStage {
        let (next, shown, callback) = {
            let mut state = self.inner.lock();
            if state.stage != current || current == CelebrationStage::Idle {
                tracing::debug!(
                    requested = current.as_str(),
                    showing = state.stage.as_str(),
                    "ignoring stale dismissal"
                );
                return state.stage;
            }
            let shown = match current {
                CelebrationStage::Trophy => state.current_trophy,
                _ => None,
            };
            state.advance();
            let callback = if state.stage == CelebrationStage::Idle {
                state.on_complete.take()
            } else {
                None
            };
            (state.stage, shown, callback)
        };

        if let Some(trophy) = shown {
            let now = self.inner.clock.now();
            if let Err(e) = self
                .inner
                .store
                .mark_trophy_shown(&self.inner.user_id, trophy, now)
            {
                tracing::warn!(trophy = %trophy, error = %e, "failed to mark trophy shown");
            }
        }
        if let Some(callback) = callback {
            tracing::info!(user_id = %self.inner.user_id, "celebration complete");
            callback();
        }
        next
    }

    fn load_background(&self) -> Result<BackgroundLoad> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let week = week_calendar(
            inner.store.as_ref(),
            &inner.user_id,
            &inner.timezone,
            inner.daily_goal_minutes,
            now,
        )?;
        let trophies = pending_trophies(inner.store.as_ref(), &inner.user_id, now)?;
        Ok(BackgroundLoad { week, trophies })
    }
}

/// Monday to Sunday of the week containing `now`, in the user's timezone.
pub fn week_calendar(
    store: &dyn CelebrationStore,
    user_id: &str,
    tz: &UserTimezone,
    daily_goal_minutes: u32,
    now: DateTime<Utc>,
) -> Result<Vec<DayCompletion>> {
    let today = tz.day_key(now);
    let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let sunday = monday + Duration::days(6);
    let seconds = store.daily_seconds(user_id, tz, monday, sunday)?;

    Ok((0..7)
        .map(|offset| {
            let day = monday + Duration::days(offset);
            let minutes = seconds.get(&day).copied().unwrap_or(0) / 60;
            DayCompletion {
                day,
                minutes,
                goal_met: minutes > 0 && minutes >= u64::from(daily_goal_minutes),
            }
        })
        .collect())
}

/// Persist newly crossed thresholds, then return every unshown trophy.
pub fn pending_trophies(
    store: &dyn CelebrationStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<TrophyId>> {
    let stats = store.stats_snapshot(user_id)?;
    let known: HashSet<TrophyId> = store
        .trophy_unlocks(user_id)?
        .into_iter()
        .map(|unlock| unlock.trophy)
        .collect();
    for trophy in newly_unlocked(&stats, &known) {
        if store.unlock_trophy(user_id, trophy, now)? {
            tracing::info!(user_id, trophy = %trophy, "trophy unlocked");
        }
    }

    let mut unshown: Vec<_> = store
        .trophy_unlocks(user_id)?
        .into_iter()
        .filter(|unlock| unlock.shown_at.is_none())
        .collect();
    unshown.sort_by_key(|unlock| (unlock.unlocked_at, unlock.trophy));
    Ok(unshown.into_iter().map(|unlock| unlock.trophy).collect())
}
