use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Subcommand;
use studioflow_core::celebration::{CelebrationSequencer, CelebrationStage};
use studioflow_core::timer::{lock_timer, SessionTimer, Stage, TimerDriver, TimerPorts};
use studioflow_core::{complete_session, CompletedSession};
use tokio::sync::mpsc;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a session
    Start {
        /// Pipeline stage to start in (idea, script, review, record, edit)
        #[arg(long, default_value = "idea")]
        stage: Stage,
        /// Content item the session works on
        #[arg(long)]
        content: Option<String>,
        /// Daily goal in minutes (defaults to the profile's goal)
        #[arg(long)]
        goal: Option<u32>,
    },
    /// Pause the running session
    Pause,
    /// Resume a paused session
    Resume,
    /// Switch to another pipeline stage
    Stage {
        stage: Stage,
    },
    /// Advance the timer by whole seconds
    Tick {
        #[arg(long, default_value = "1")]
        seconds: u64,
    },
    /// Run the timer in the foreground for a while
    Run {
        /// Seconds to run before returning
        #[arg(long = "for", default_value = "60")]
        duration: u64,
    },
    /// Flush the open segment without stopping the session
    ExitFlush,
    /// Print current timer state as JSON
    Status,
    /// End the session, record it and show the celebration
    End {
        /// Skip the celebration sequence
        #[arg(long)]
        no_celebrate: bool,
    },
    /// Drop the session without recording it
    Reset,
}

fn load_timer(ctx: &Context) -> SessionTimer {
    let ports = TimerPorts {
        identity: ctx.identity.clone(),
        snapshots: ctx.db.clone(),
        ledger: ctx.db.clone(),
        clock: ctx.clock.clone(),
    };
    SessionTimer::load(ports, ctx.config.timer.clone())
}

pub fn run(action: SessionAction) -> CliResult {
    let ctx = Context::open()?;
    let mut timer = load_timer(&ctx);

    match action {
        SessionAction::Start {
            stage,
            content,
            goal,
        } => {
            let goal = match goal {
                Some(goal) => goal,
                None => ctx.profile()?.daily_goal_minutes,
            };
            let event = timer.start(stage, content, goal)?;
            print_json(&event)?;
        }
        SessionAction::Pause => match timer.pause() {
            Some(event) => print_json(&event)?,
            None => print_json(&timer.snapshot())?,
        },
        SessionAction::Resume => match timer.resume() {
            Some(event) => print_json(&event)?,
            None => print_json(&timer.snapshot())?,
        },
        SessionAction::Stage { stage } => match timer.change_stage(stage)? {
            Some(event) => print_json(&event)?,
            None => print_json(&timer.snapshot())?,
        },
        SessionAction::Tick { seconds } => {
            for _ in 0..seconds {
                if let Some(event) = timer.tick() {
                    print_json(&event)?;
                }
            }
            timer.flush_on_exit();
            print_json(&timer.snapshot())?;
        }
        SessionAction::Run { duration } => {
            let timer = run_foreground(timer, Duration::from_secs(duration))?;
            print_json(&lock_timer(&timer).snapshot())?;
        }
        SessionAction::ExitFlush => {
            let outcome = timer.flush_on_exit();
            print_json(&outcome)?;
        }
        SessionAction::Status => {
            print_json(&timer.snapshot())?;
        }
        SessionAction::End { no_celebrate } => {
            let validator = ctx.validator()?;
            let done = complete_session(&mut timer, &ctx.db, &validator, &ctx.config.xp)?;
            print_json(&done)?;
            if !no_celebrate {
                celebrate(&ctx, done)?;
            }
        }
        SessionAction::Reset => {
            print_json(&timer.reset())?;
        }
    }
    Ok(())
}

/// Drive the timer with real intervals, printing events as they happen.
fn run_foreground(timer: SessionTimer, duration: Duration) -> CliResult<Arc<Mutex<SessionTimer>>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let shared = Arc::new(Mutex::new(timer));

    runtime.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = TimerDriver::new(shared.clone()).with_events(tx);
        driver.sync();
        if !driver.is_scheduled() {
            tracing::warn!("no running session, nothing to drive");
            return Ok::<(), Box<dyn std::error::Error>>(());
        }

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                Some(event) = rx.recv() => print_json(&event)?,
            }
        }
        driver.stop();
        Ok(())
    })?;

    let outcome = lock_timer(&shared).flush_on_exit();
    tracing::debug!(written = outcome.written, pending = outcome.pending, "exit flush");
    Ok(shared)
}

/// Play the celebration to the end, printing each screen.
fn celebrate(ctx: &Context, done: CompletedSession) -> CliResult {
    let profile = ctx.profile()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let sequencer = CelebrationSequencer::new(
        profile.user_id,
        ctx.db.clone(),
        ctx.clock.clone(),
        profile.timezone,
        profile.daily_goal_minutes,
    );

    runtime.block_on(async {
        let load = sequencer.trigger(done.summary, done.streak_count, done.xp_gained, || {
            tracing::debug!("celebration finished");
        });
        if let Err(e) = load.await {
            tracing::warn!(error = %e, "celebration load task failed");
        }
    });

    let mut stage = sequencer.stage();
    while stage != CelebrationStage::Idle {
        print_json(&sequencer.state())?;
        stage = sequencer.dismiss(stage);
    }
    Ok(())
}
