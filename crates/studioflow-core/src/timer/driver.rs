//! Tokio driver for a [`SessionTimer`].
//!
//! Two interval tasks run per running session: the 1 Hz tick and the
//! auto-save. [`TimerDriver::sync`] tears both down and respawns them only
//! while the timer is `Active && !Paused`; call it after every command that
//! can change that.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::engine::SessionTimer;
use crate::events::Event;

/// The timer as shared between the driver tasks and the caller.
pub type SharedTimer = Arc<Mutex<SessionTimer>>;

/// Lock the shared timer, recovering from a poisoned lock.
pub fn lock_timer(timer: &SharedTimer) -> MutexGuard<'_, SessionTimer> {
    timer.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TimerDriver {
    timer: SharedTimer,
    events: Option<mpsc::UnboundedSender<Event>>,
    tick_task: Option<JoinHandle<()>>,
    autosave_task: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerDriver {
    pub fn new(timer: SharedTimer) -> Self {
        Self {
            timer,
            events: None,
            tick_task: None,
            autosave_task: None,
            generation: 0,
        }
    }

    /// Forward timer events produced by the tick task.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    /// How many times the tasks have been (re)spawned.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_scheduled(&self) -> bool {
        self.tick_task.is_some() || self.autosave_task.is_some()
    }

    /// Match the scheduled tasks to the timer's state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn sync(&mut self) {
        self.stop();
        let (running, tick_ms, autosave_secs) = {
            let timer = lock_timer(&self.timer);
            let config = timer.config();
            (
                timer.is_running(),
                config.tick_interval_ms.max(1),
                config.autosave_interval_secs.max(1),
            )
        };
        if !running {
            return;
        }

        self.generation += 1;
        tracing::debug!(generation = self.generation, "scheduling timer tasks");
        self.tick_task = Some(tokio::spawn(tick_loop(
            self.timer.clone(),
            Duration::from_millis(tick_ms),
            self.events.clone(),
        )));
        self.autosave_task = Some(tokio::spawn(autosave_loop(
            self.timer.clone(),
            Duration::from_secs(autosave_secs),
        )));
    }

    /// Abort both tasks.
    pub fn stop(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        if let Some(task) = self.autosave_task.take() {
            task.abort();
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    timer: SharedTimer,
    period: Duration,
    events: Option<mpsc::UnboundedSender<Event>>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let (event, running) = {
            let mut timer = lock_timer(&timer);
            (timer.tick(), timer.is_running())
        };
        if let (Some(event), Some(tx)) = (event, events.as_ref()) {
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(event);
        }
        if !running {
            break;
        }
    }
}

async fn autosave_loop(timer: SharedTimer, period: Duration) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let (outcome, running) = {
            let mut timer = lock_timer(&timer);
            (timer.auto_save(), timer.is_running())
        };
        tracing::debug!(
            written = outcome.written,
            pending = outcome.pending,
            "auto-save checkpoint"
        );
        if !running {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, FixedClock, StaticIdentity, TimerConfig};
    use crate::timer::{Stage, TimerPorts};
    use chrono::{TimeZone, Utc};

    fn shared_timer(config: TimerConfig) -> (Arc<Database>, SharedTimer) {
        let db = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()));
        let ports = TimerPorts {
            identity: Arc::new(StaticIdentity::signed_in("u1")),
            snapshots: db.clone(),
            ledger: db.clone(),
            clock,
        };
        (db, Arc::new(Mutex::new(SessionTimer::load(ports, config))))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second_while_running() {
        let (_db, timer) = shared_timer(TimerConfig::default());
        lock_timer(&timer).start(Stage::Idea, None, 30).unwrap();
        let mut driver = TimerDriver::new(timer.clone());
        driver.sync();
        assert!(driver.is_scheduled());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(lock_timer(&timer).session().elapsed_seconds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_tears_tasks_down() {
        let (_db, timer) = shared_timer(TimerConfig::default());
        lock_timer(&timer).start(Stage::Idea, None, 30).unwrap();
        let mut driver = TimerDriver::new(timer.clone());
        driver.sync();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        lock_timer(&timer).pause();
        driver.sync();
        assert!(!driver.is_scheduled());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(lock_timer(&timer).session().elapsed_seconds, 2);

        lock_timer(&timer).resume();
        driver.sync();
        assert_eq!(driver.generation(), 2);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(lock_timer(&timer).session().elapsed_seconds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_sync_never_doubles_ticks() {
        let (_db, timer) = shared_timer(TimerConfig::default());
        lock_timer(&timer).start(Stage::Script, None, 30).unwrap();
        let mut driver = TimerDriver::new(timer.clone());
        driver.sync();
        driver.sync();
        driver.sync();
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(lock_timer(&timer).session().elapsed_seconds, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_save_writes_ledger_rows() {
        let config = TimerConfig {
            autosave_interval_secs: 10,
            ..TimerConfig::default()
        };
        let (db, timer) = shared_timer(config);
        lock_timer(&timer).start(Stage::Record, None, 30).unwrap();
        let mut driver = TimerDriver::new(timer.clone());
        driver.sync();

        tokio::time::sleep(Duration::from_millis(25_500)).await;
        assert_eq!(db.stage_time_rows("u1").unwrap().len(), 2);

        driver.stop();
        let summary = lock_timer(&timer).end().unwrap();
        let logged: u64 = db
            .stage_time_rows("u1")
            .unwrap()
            .iter()
            .map(|row| row.duration_seconds)
            .sum();
        assert_eq!(summary.total_seconds, 25);
        assert_eq!(logged, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn streak_event_is_forwarded() {
        let config = TimerConfig {
            streak_mode_minutes: 1,
            ..TimerConfig::default()
        };
        let (_db, timer) = shared_timer(config);
        lock_timer(&timer).start(Stage::Edit, None, 30).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TimerDriver::new(timer.clone()).with_events(tx);
        driver.sync();

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert!(matches!(rx.try_recv(), Ok(Event::StreakModeEntered { elapsed_seconds: 60, .. })));
        assert!(lock_timer(&timer).session().is_streak_mode);
    }
}
