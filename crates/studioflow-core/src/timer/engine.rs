//! Session timer state machine.
//!
//! The timer counts seconds; it has no thread of its own. The caller (or a
//! [`TimerDriver`](super::TimerDriver)) invokes `tick()` once per second and
//! `auto_save()` on the auto-save cadence.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Active <-> Paused -> Idle
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut timer = SessionTimer::load(ports, config.timer.clone());
//! timer.start(Stage::Idea, Some("video-42".into()), 30)?;
//! timer.tick();
//! timer.change_stage(Stage::Script)?;
//! let summary = timer.end()?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recorder::{FlushOutcome, FlushTrigger, LedgerCheckpoint, OpenSegment, StageTimeRecorder};
use super::session::{Session, SessionSummary, TimerState};
use super::stage::Stage;
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::storage::{Clock, IdentityProvider, LedgerStore, SnapshotStore, TimerConfig};

/// Key of the crash-safe snapshot in the [`SnapshotStore`].
pub const SNAPSHOT_KEY: &str = "session_snapshot";

/// What lives under [`SNAPSHOT_KEY`]: the session and the recorder's queue.
///
/// An idle snapshot is kept only while ledger writes are still owed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSnapshot {
    #[serde(flatten)]
    session: Session,
    #[serde(default)]
    ledger: LedgerCheckpoint,
}

/// Collaborators the timer needs.
#[derive(Clone)]
pub struct TimerPorts {
    pub identity: Arc<dyn IdentityProvider>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub clock: Arc<dyn Clock>,
}

/// What `load` found in the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotRecovery {
    /// No active snapshot.
    Fresh,
    /// An active session was picked up where it left off.
    Resumed { elapsed_seconds: u64 },
    /// The snapshot was older than the orphan cut-off.
    DiscardedOrphan { started_at: DateTime<Utc> },
    /// The snapshot belonged to a different user.
    DiscardedOtherUser,
    /// The snapshot could not be parsed or lacked a start time.
    DiscardedUnreadable,
}

/// Owner of the live [`Session`].
pub struct SessionTimer {
    session: Session,
    recorder: StageTimeRecorder,
    identity: Arc<dyn IdentityProvider>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    recovery: SnapshotRecovery,
}

impl SessionTimer {
    /// Build a timer, resuming a persisted session unless it is orphaned.
    pub fn load(ports: TimerPorts, config: TimerConfig) -> Self {
        let now = ports.clock.now();
        let (session, recovery, ledger) = match ports.snapshots.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => classify_snapshot(&raw, now, &config, ports.identity.as_ref()),
            Ok(None) => (Session::default(), SnapshotRecovery::Fresh, LedgerCheckpoint::default()),
            Err(e) => {
                tracing::warn!(error = %e, "could not read session snapshot, starting idle");
                (Session::default(), SnapshotRecovery::Fresh, LedgerCheckpoint::default())
            }
        };
        if !ledger.is_empty() {
            tracing::info!(pending = ledger.pending.len(), "ledger writes carried over from snapshot");
        }

        let timer = Self {
            session,
            recorder: StageTimeRecorder::restore(ports.ledger, ledger),
            identity: ports.identity,
            snapshots: ports.snapshots,
            clock: ports.clock,
            config,
            recovery,
        };

        match &timer.recovery {
            SnapshotRecovery::Fresh => {}
            SnapshotRecovery::Resumed { elapsed_seconds } => {
                tracing::info!(elapsed_seconds, "resumed session from snapshot");
            }
            discarded => {
                // The session goes, owed ledger writes stay.
                tracing::info!(reason = ?discarded, "discarding stale session snapshot");
                timer.persist();
            }
        }
        timer
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TimerState {
        self.session.state()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn recovery(&self) -> &SnapshotRecovery {
        &self.recovery
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Ledger rows whose write failed and await the next checkpoint.
    pub fn pending_ledger_rows(&self) -> usize {
        self.recorder.pending_len()
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            state: self.state(),
            stage: self.session.stage,
            elapsed_seconds: self.session.elapsed_seconds,
            stage_elapsed_seconds: self.session.stage_elapsed_seconds,
            is_streak_mode: self.session.is_streak_mode,
            content_id: self.session.content_id.clone(),
            pending_ledger_rows: self.recorder.pending_len(),
            at: self.clock.now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a session in `stage`.
    ///
    /// The snapshot is written before this returns.
    pub fn start(
        &mut self,
        stage: Stage,
        content_id: Option<String>,
        daily_goal_minutes: u32,
    ) -> Result<Event> {
        let user_id = self
            .identity
            .current_user()
            .ok_or(CoreError::NotAuthenticated)?;
        if self.session.is_active {
            return Err(CoreError::AlreadyActive {
                started_at: self.session.started_at.unwrap_or_else(|| self.clock.now()),
            });
        }

        let now = self.clock.now();
        let session_id = Uuid::new_v4();
        self.session = Session {
            session_id: Some(session_id),
            user_id: Some(user_id),
            is_active: true,
            is_paused: false,
            stage,
            elapsed_seconds: 0,
            stage_elapsed_seconds: 0,
            started_at: Some(now),
            is_streak_mode: false,
            daily_goal_minutes,
            content_id: content_id.clone(),
            stage_totals: Default::default(),
            open_segment: None,
        };
        self.open_segment(now);
        self.persist();

        tracing::info!(%session_id, %stage, "session started");
        Ok(Event::SessionStarted {
            session_id,
            stage,
            content_id,
            at: now,
        })
    }

    pub fn pause(&mut self) -> Option<Event> {
        if !self.session.is_running() {
            return None;
        }
        self.close_segment(FlushTrigger::Pause);
        self.session.is_paused = true;
        self.persist();
        Some(Event::SessionPaused {
            elapsed_seconds: self.session.elapsed_seconds,
            at: self.clock.now(),
        })
    }

    pub fn resume(&mut self) -> Option<Event> {
        if !(self.session.is_active && self.session.is_paused) {
            return None;
        }
        let now = self.clock.now();
        self.session.is_paused = false;
        self.open_segment(now);
        self.persist();
        Some(Event::SessionResumed {
            elapsed_seconds: self.session.elapsed_seconds,
            at: now,
        })
    }

    /// Advance both counters by one second.
    ///
    /// Returns `Some(Event::StreakModeEntered)` on the tick that reaches the
    /// streak threshold.
    pub fn tick(&mut self) -> Option<Event> {
        if !self.session.is_running() {
            return None;
        }
        let session = &mut self.session;
        session.elapsed_seconds += 1;
        session.stage_elapsed_seconds += 1;
        *session.stage_totals.entry(session.stage).or_insert(0) += 1;

        if !session.is_streak_mode && session.elapsed_seconds >= self.config.streak_threshold_secs() {
            session.is_streak_mode = true;
            tracing::info!(elapsed_seconds = session.elapsed_seconds, "streak mode entered");
            return Some(Event::StreakModeEntered {
                elapsed_seconds: session.elapsed_seconds,
                at: self.clock.now(),
            });
        }
        None
    }

    /// Flush the current stage, then switch to `new_stage`.
    ///
    /// Returns `Ok(None)` when `new_stage` is already the current stage.
    pub fn change_stage(&mut self, new_stage: Stage) -> Result<Option<Event>> {
        if !self.session.is_active {
            return Err(CoreError::NotActive);
        }
        let from = self.session.stage;
        if from == new_stage {
            return Ok(None);
        }

        let (flushed_seconds, _) = self.close_segment(FlushTrigger::StageChange);
        let now = self.clock.now();
        self.session.stage = new_stage;
        self.session.stage_elapsed_seconds = 0;
        if self.session.is_running() {
            self.open_segment(now);
        }
        self.persist();

        tracing::info!(%from, to = %new_stage, flushed_seconds, "stage changed");
        Ok(Some(Event::StageChanged {
            from,
            to: new_stage,
            flushed_seconds,
            at: now,
        }))
    }

    /// Flush what the open segment holds and start a new one.
    pub fn auto_save(&mut self) -> FlushOutcome {
        if !self.session.is_running() {
            return self.retry_pending(FlushTrigger::AutoSave);
        }
        let (_, outcome) = self.close_segment(FlushTrigger::AutoSave);
        self.open_segment(self.clock.now());
        self.persist();
        outcome
    }

    /// Best-effort flush when the surface hides or unmounts.
    pub fn flush_on_exit(&mut self) -> FlushOutcome {
        if !self.session.is_active {
            return self.retry_pending(FlushTrigger::Exit);
        }
        let (_, outcome) = self.close_segment(FlushTrigger::Exit);
        if self.session.is_running() {
            self.open_segment(self.clock.now());
        }
        self.persist();
        outcome
    }

    /// Final flush, then reset. Returns the session's summary.
    pub fn end(&mut self) -> Result<SessionSummary> {
        if !self.session.is_active {
            return Err(CoreError::NotActive);
        }
        self.close_segment(FlushTrigger::End);

        let now = self.clock.now();
        let session = &self.session;
        let summary = SessionSummary {
            session_id: session.session_id.unwrap_or_else(Uuid::new_v4),
            user_id: session.user_id.clone().unwrap_or_default(),
            content_id: session.content_id.clone(),
            started_at: session.started_at.unwrap_or(now),
            ended_at: now,
            total_seconds: session.elapsed_seconds,
            final_stage: session.stage,
            stage_totals: session.stage_totals.clone(),
            streak_mode: session.is_streak_mode,
            daily_goal_minutes: session.daily_goal_minutes,
        };
        tracing::info!(
            session_id = %summary.session_id,
            total_seconds = summary.total_seconds,
            streak_mode = summary.streak_mode,
            "session ended"
        );
        self.reset();
        Ok(summary)
    }

    /// Zero all state and clear the persisted snapshot.
    ///
    /// Ledger writes still queued keep an idle snapshot alive until they land.
    pub fn reset(&mut self) -> Event {
        self.session = Session::default();
        self.persist();
        Event::SessionReset {
            at: self.clock.now(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn open_segment(&mut self, now: DateTime<Utc>) {
        self.session.open_segment = Some(OpenSegment {
            stage: self.session.stage,
            started_at: now,
            offset_seconds: self.session.stage_elapsed_seconds,
        });
    }

    /// Hand the open segment to the recorder. Returns its length in seconds.
    fn close_segment(&mut self, trigger: FlushTrigger) -> (u64, FlushOutcome) {
        let Some(segment) = self.session.open_segment.take() else {
            return (0, self.recorder.retry_pending(trigger));
        };
        let Some(user_id) = self.session.user_id.as_deref() else {
            tracing::warn!("open segment without a user, dropping it");
            return (0, self.recorder.retry_pending(trigger));
        };
        let seconds = self
            .session
            .stage_elapsed_seconds
            .saturating_sub(segment.offset_seconds);
        let outcome = self.recorder.flush(
            trigger,
            user_id,
            self.session.session_id,
            segment.stage,
            segment.started_at,
            self.clock.now(),
            seconds,
            self.session.content_id.as_deref(),
        );
        (seconds, outcome)
    }

    fn retry_pending(&mut self, trigger: FlushTrigger) -> FlushOutcome {
        let outcome = self.recorder.retry_pending(trigger);
        if outcome.written > 0 {
            self.persist();
        }
        outcome
    }

    fn persist(&self) {
        let ledger = self.recorder.checkpoint();
        if !self.session.is_active && ledger.is_empty() {
            if let Err(e) = self.snapshots.remove(SNAPSHOT_KEY) {
                tracing::warn!(error = %e, "failed to clear session snapshot");
            }
            return;
        }
        let stored = StoredSnapshot {
            session: self.session.clone(),
            ledger,
        };
        let json = match serde_json::to_string(&stored) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize session snapshot");
                return;
            }
        };
        if let Err(e) = self.snapshots.set(SNAPSHOT_KEY, &json) {
            tracing::warn!(error = %e, "failed to persist session snapshot");
        }
    }
}

fn classify_snapshot(
    raw: &str,
    now: DateTime<Utc>,
    config: &TimerConfig,
    identity: &dyn IdentityProvider,
) -> (Session, SnapshotRecovery, LedgerCheckpoint) {
    let StoredSnapshot { session, ledger } = match serde_json::from_str::<StoredSnapshot>(raw) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable session snapshot");
            return (
                Session::default(),
                SnapshotRecovery::DiscardedUnreadable,
                LedgerCheckpoint::default(),
            );
        }
    };
    if !session.is_active {
        return (Session::default(), SnapshotRecovery::Fresh, ledger);
    }
    let Some(started_at) = session.started_at else {
        return (Session::default(), SnapshotRecovery::DiscardedUnreadable, ledger);
    };
    if now - started_at > config.orphan_after() {
        return (
            Session::default(),
            SnapshotRecovery::DiscardedOrphan { started_at },
            ledger,
        );
    }
    if let Some(current) = identity.current_user() {
        if session.user_id.as_deref() != Some(current.as_str()) {
            return (Session::default(), SnapshotRecovery::DiscardedOtherUser, ledger);
        }
    }
    let elapsed_seconds = session.elapsed_seconds;
    (session, SnapshotRecovery::Resumed { elapsed_seconds }, ledger)
}
