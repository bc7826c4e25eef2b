mod driver;
mod engine;
mod recorder;
mod session;
mod stage;

pub use driver::{lock_timer, SharedTimer, TimerDriver};
pub use engine::{SessionTimer, SnapshotRecovery, TimerPorts, SNAPSHOT_KEY};
pub use recorder::{
    FlushOutcome, FlushTrigger, LedgerCheckpoint, OpenSegment, PendingSegment, StageTimeRecord,
    StageTimeRecorder,
};
pub use session::{Session, SessionSummary, TimerState};
pub use stage::Stage;
