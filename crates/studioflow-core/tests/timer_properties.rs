//! Property tests for the session timer and stage-time ledger.
//!
//! Random interleavings of ticks, pauses, stage changes and checkpoints must
//! never lose or duplicate a second in the ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use studioflow_core::storage::{Database, FixedClock, StaticIdentity, TimerConfig};
use studioflow_core::timer::{SessionTimer, Stage, TimerPorts};

#[derive(Debug, Clone)]
enum Op {
    Tick(u16),
    Pause,
    Resume,
    ChangeStage(Stage),
    AutoSave,
    ExitFlush,
}

fn arb_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Idea),
        Just(Stage::Script),
        Just(Stage::Review),
        Just(Stage::Record),
        Just(Stage::Edit),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u16..=90).prop_map(Op::Tick),
        1 => Just(Op::Pause),
        1 => Just(Op::Resume),
        2 => arb_stage().prop_map(Op::ChangeStage),
        1 => Just(Op::AutoSave),
        1 => Just(Op::ExitFlush),
    ]
}

fn fixture() -> (Arc<Database>, Arc<FixedClock>, SessionTimer) {
    let db = Arc::new(Database::open_memory().unwrap());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
    let ports = TimerPorts {
        identity: Arc::new(StaticIdentity::signed_in("prop-user")),
        snapshots: db.clone(),
        ledger: db.clone(),
        clock: clock.clone(),
    };
    let config = TimerConfig {
        streak_mode_minutes: 1,
        ..TimerConfig::default()
    };
    (db, clock, SessionTimer::load(ports, config))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_matches_counted_seconds(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (db, clock, mut timer) = fixture();
        timer.start(Stage::Idea, Some("clip".into()), 30).unwrap();

        let mut counted = 0u64;
        for op in &ops {
            match op {
                Op::Tick(n) => {
                    for _ in 0..*n {
                        clock.advance(Duration::seconds(1));
                        let running = timer.is_running();
                        timer.tick();
                        if running {
                            counted += 1;
                        }
                    }
                }
                Op::Pause => { timer.pause(); }
                Op::Resume => { timer.resume(); }
                Op::ChangeStage(stage) => {
                    let before = timer.session().elapsed_seconds;
                    timer.change_stage(*stage).unwrap();
                    prop_assert_eq!(timer.session().elapsed_seconds, before);
                    prop_assert_eq!(timer.session().stage, *stage);
                }
                Op::AutoSave => { timer.auto_save(); }
                Op::ExitFlush => { timer.flush_on_exit(); }
            }
        }

        let summary = timer.end().unwrap();
        prop_assert_eq!(summary.total_seconds, counted);
        prop_assert_eq!(summary.stage_totals.values().sum::<u64>(), counted);
        prop_assert_eq!(summary.streak_mode, counted >= 60);

        let rows = db.stage_time_rows("prop-user").unwrap();
        prop_assert!(rows.iter().all(|row| row.duration_seconds > 0));
        let mut ledger: BTreeMap<Stage, u64> = BTreeMap::new();
        for row in &rows {
            *ledger.entry(row.stage).or_insert(0) += row.duration_seconds;
        }
        let expected: BTreeMap<Stage, u64> = summary
            .stage_totals
            .iter()
            .filter(|(_, secs)| **secs > 0)
            .map(|(stage, secs)| (*stage, *secs))
            .collect();
        prop_assert_eq!(ledger, expected);
    }

    #[test]
    fn streak_mode_never_turns_off(ticks in 60u16..200, extra in prop::collection::vec(arb_op(), 0..10)) {
        let (_db, clock, mut timer) = fixture();
        timer.start(Stage::Record, None, 30).unwrap();
        for _ in 0..ticks {
            clock.advance(Duration::seconds(1));
            timer.tick();
        }
        prop_assert!(timer.session().is_streak_mode);
        for op in &extra {
            match op {
                Op::Tick(n) => for _ in 0..*n { timer.tick(); },
                Op::Pause => { timer.pause(); }
                Op::Resume => { timer.resume(); }
                Op::ChangeStage(stage) => { timer.change_stage(*stage).unwrap(); }
                Op::AutoSave => { timer.auto_save(); }
                Op::ExitFlush => { timer.flush_on_exit(); }
            }
            prop_assert!(timer.session().is_streak_mode);
        }
    }
}
