//! Stage-time recorder.
//!
//! Turns stretches of timer seconds into append-only ledger rows. Durations in
//! the ledger are summed, so a segment written twice silently inflates the
//! user's totals. Every closed segment therefore gets a sequence number and
//! the recorder never writes a sequence number it has already committed.
//!
//! Writes that fail stay queued and go out with the next checkpoint
//! (auto-save, stage change, pause, end or exit). The queue and counters
//! travel in the session snapshot as a [`LedgerCheckpoint`], so a restart
//! picks up where the last process stopped.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;
use crate::storage::LedgerStore;

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeRecord {
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub content_item_id: Option<String>,
}

/// The stretch of the current stage that has not been written yet.
///
/// `offset_seconds` is the stage-elapsed value at which the segment opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSegment {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub offset_seconds: u64,
}

/// Why a flush happened; carried into the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    StageChange,
    AutoSave,
    Pause,
    End,
    Exit,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::StageChange => "stage_change",
            FlushTrigger::AutoSave => "auto_save",
            FlushTrigger::Pause => "pause",
            FlushTrigger::End => "end",
            FlushTrigger::Exit => "exit",
        }
    }
}

/// A closed segment waiting for its ledger write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSegment {
    pub seq: u64,
    pub record: StageTimeRecord,
}

/// Recorder state persisted alongside the session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerCheckpoint {
    #[serde(default)]
    pub next_seq: u64,
    #[serde(default)]
    pub committed_through: u64,
    #[serde(default)]
    pub pending: Vec<PendingSegment>,
}

impl LedgerCheckpoint {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of one flush call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlushOutcome {
    /// Rows appended by this call, including retried ones.
    pub written: usize,
    /// Rows still waiting for a successful write.
    pub pending: usize,
}

/// Single writer for the stage-time ledger.
pub struct StageTimeRecorder {
    ledger: Arc<dyn LedgerStore>,
    next_seq: u64,
    committed_through: u64,
    pending: VecDeque<PendingSegment>,
}

impl StageTimeRecorder {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self::restore(ledger, LedgerCheckpoint::default())
    }

    /// Rebuild a recorder from a persisted checkpoint.
    ///
    /// Segments at or below `committed_through` are dropped, and numbering
    /// resumes above every sequence the checkpoint mentions.
    pub fn restore(ledger: Arc<dyn LedgerStore>, checkpoint: LedgerCheckpoint) -> Self {
        let committed_through = checkpoint.committed_through;
        let pending: VecDeque<PendingSegment> = checkpoint
            .pending
            .into_iter()
            .filter(|segment| segment.seq > committed_through)
            .collect();
        let highest = pending
            .iter()
            .map(|segment| segment.seq)
            .max()
            .unwrap_or(0)
            .max(committed_through);
        Self {
            ledger,
            next_seq: checkpoint.next_seq.max(highest + 1),
            committed_through,
            pending,
        }
    }

    /// State to persist so a later process can finish the queued writes.
    pub fn checkpoint(&self) -> LedgerCheckpoint {
        LedgerCheckpoint {
            next_seq: self.next_seq,
            committed_through: self.committed_through,
            pending: self.pending.iter().cloned().collect(),
        }
    }

    /// Queue one segment and write everything queued.
    ///
    /// Zero-length segments are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn flush(
        &mut self,
        trigger: FlushTrigger,
        user_id: &str,
        session_id: Option<Uuid>,
        stage: Stage,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_seconds: u64,
        content_id: Option<&str>,
    ) -> FlushOutcome {
        if duration_seconds > 0 {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.pending.push_back(PendingSegment {
                seq,
                record: StageTimeRecord {
                    user_id: user_id.to_string(),
                    session_id,
                    stage,
                    started_at,
                    ended_at,
                    duration_seconds,
                    content_item_id: content_id.map(str::to_string),
                },
            });
        }
        self.drain(trigger)
    }

    /// Retry queued writes without closing a new segment.
    pub fn retry_pending(&mut self, trigger: FlushTrigger) -> FlushOutcome {
        self.drain(trigger)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Highest sequence number known to be in the ledger.
    pub fn committed_through(&self) -> u64 {
        self.committed_through
    }

    fn drain(&mut self, trigger: FlushTrigger) -> FlushOutcome {
        let mut written = 0;
        while let Some(segment) = self.pending.front() {
            if segment.seq <= self.committed_through {
                tracing::debug!(seq = segment.seq, "segment already committed, dropping");
                self.pending.pop_front();
                continue;
            }
            match self.ledger.append_stage_time(&segment.record) {
                Ok(row_id) => {
                    tracing::debug!(
                        row_id,
                        seq = segment.seq,
                        stage = %segment.record.stage,
                        seconds = segment.record.duration_seconds,
                        trigger = trigger.as_str(),
                        "stage time flushed"
                    );
                    self.committed_through = segment.seq;
                    self.pending.pop_front();
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        seq = segment.seq,
                        pending = self.pending.len(),
                        trigger = trigger.as_str(),
                        "stage time flush failed, will retry at next checkpoint"
                    );
                    break;
                }
            }
        }
        FlushOutcome {
            written,
            pending: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, DatabaseError, Result};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakyLedger {
        rows: Mutex<Vec<StageTimeRecord>>,
        fail: Mutex<bool>,
    }

    impl LedgerStore for FlakyLedger {
        fn append_stage_time(&self, record: &StageTimeRecord) -> Result<i64> {
            if *self.fail.lock().unwrap() {
                return Err(CoreError::Database(DatabaseError::Locked));
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(record.clone());
            Ok(rows.len() as i64)
        }
    }

    fn flush_secs(recorder: &mut StageTimeRecorder, secs: u64) -> FlushOutcome {
        let now = Utc::now();
        recorder.flush(
            FlushTrigger::AutoSave,
            "u1",
            None,
            Stage::Idea,
            now,
            now,
            secs,
            Some("c1"),
        )
    }

    #[test]
    fn writes_one_row_per_segment() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut recorder = StageTimeRecorder::new(ledger.clone());
        let outcome = flush_secs(&mut recorder, 12);
        assert_eq!(outcome, FlushOutcome { written: 1, pending: 0 });
        let rows = ledger.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_seconds, 12);
        assert_eq!(rows[0].content_item_id.as_deref(), Some("c1"));
    }

    #[test]
    fn zero_length_segments_are_skipped() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut recorder = StageTimeRecorder::new(ledger.clone());
        assert_eq!(flush_secs(&mut recorder, 0), FlushOutcome::default());
        assert!(ledger.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_writes_retry_in_order_exactly_once() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut recorder = StageTimeRecorder::new(ledger.clone());

        *ledger.fail.lock().unwrap() = true;
        assert_eq!(flush_secs(&mut recorder, 30).pending, 1);
        assert_eq!(flush_secs(&mut recorder, 30).pending, 2);

        *ledger.fail.lock().unwrap() = false;
        let outcome = flush_secs(&mut recorder, 5);
        assert_eq!(outcome, FlushOutcome { written: 3, pending: 0 });
        assert_eq!(recorder.committed_through(), 3);

        // Nothing left to write.
        assert_eq!(recorder.retry_pending(FlushTrigger::Exit).written, 0);
        let secs: Vec<u64> = ledger
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.duration_seconds)
            .collect();
        assert_eq!(secs, vec![30, 30, 5]);
    }

    #[test]
    fn queued_writes_survive_a_checkpoint_round_trip() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut recorder = StageTimeRecorder::new(ledger.clone());
        flush_secs(&mut recorder, 10);

        *ledger.fail.lock().unwrap() = true;
        flush_secs(&mut recorder, 30);
        flush_secs(&mut recorder, 20);
        let checkpoint = recorder.checkpoint();
        assert_eq!(checkpoint.committed_through, 1);
        assert_eq!(checkpoint.pending.len(), 2);

        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: LedgerCheckpoint = serde_json::from_str(&json).unwrap();
        drop(recorder);

        *ledger.fail.lock().unwrap() = false;
        let mut recorder = StageTimeRecorder::restore(ledger.clone(), restored);
        assert_eq!(flush_secs(&mut recorder, 5), FlushOutcome { written: 3, pending: 0 });
        assert_eq!(recorder.committed_through(), 4);
        let secs: Vec<u64> = ledger
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.duration_seconds)
            .collect();
        assert_eq!(secs, vec![10, 30, 20, 5]);
    }

    #[test]
    fn restore_drops_segments_already_committed() {
        let ledger = Arc::new(FlakyLedger::default());
        let now = Utc::now();
        let segment = |seq| PendingSegment {
            seq,
            record: StageTimeRecord {
                user_id: "u1".into(),
                session_id: None,
                stage: Stage::Edit,
                started_at: now,
                ended_at: now,
                duration_seconds: 7,
                content_item_id: None,
            },
        };
        let checkpoint = LedgerCheckpoint {
            next_seq: 0,
            committed_through: 2,
            pending: vec![segment(2), segment(3)],
        };
        let mut recorder = StageTimeRecorder::restore(ledger.clone(), checkpoint);
        assert_eq!(recorder.pending_len(), 1);
        assert_eq!(recorder.retry_pending(FlushTrigger::Exit).written, 1);
        assert_eq!(recorder.checkpoint().next_seq, 4);
        assert_eq!(ledger.rows.lock().unwrap().len(), 1);
    }
}
