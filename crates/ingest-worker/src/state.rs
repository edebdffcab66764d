//! Per-worker state machine (§4.7):
//! `starting -> consuming <-> flushing -> draining -> stopped`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Consuming,
    Flushing,
    Draining,
    Stopped,
}

impl WorkerState {
    /// Whether new records may still be read from the queue in this state.
    pub fn accepts_new_records(self) -> bool {
        matches!(self, WorkerState::Consuming | WorkerState::Flushing)
    }
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Consuming,
            2 => WorkerState::Flushing,
            3 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

impl From<WorkerState> for u8 {
    fn from(value: WorkerState) -> Self {
        match value {
            WorkerState::Starting => 0,
            WorkerState::Consuming => 1,
            WorkerState::Flushing => 2,
            WorkerState::Draining => 3,
            WorkerState::Stopped => 4,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Starting => "starting",
            WorkerState::Consuming => "consuming",
            WorkerState::Flushing => "flushing",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}
