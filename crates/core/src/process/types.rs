//! Types shared by the pipeline components.

use serde::Serialize;

/// Boxed error produced by a worker function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for pipeline runs.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The worker function returned an error.
    #[error("Worker failed: {0}")]
    Worker(#[source] BoxError),

    /// A result could not be forwarded because the output queue was closed.
    #[error("Output queue is closed")]
    OutputClosed,

    /// The worker function panicked.
    #[error("Worker panicked: {0}")]
    Panicked(String),

    /// The run was cancelled from outside.
    #[error("Pipeline run was cancelled")]
    Cancelled,

    /// The token pool was closed while a task waited for a token.
    #[error("Token pool is closed")]
    PoolClosed,

    /// No worker tokens were supplied, so no item could ever be processed.
    #[error("At least one worker token is required")]
    NoWorkers,
}

impl ProcessError {
    /// Returns the error raised by the worker function, if that is what
    /// aborted the run.
    pub fn worker_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Worker(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Worker(_) => "worker",
            Self::OutputClosed => "output_closed",
            Self::Panicked(_) => "panicked",
            Self::Cancelled => "cancelled",
            Self::PoolClosed => "pool_closed",
            Self::NoWorkers => "no_workers",
        }
    }
}

/// Lifecycle of a single pipeline run.
///
/// `Idle -> Running -> Draining -> Completed`, with `Aborted` reachable from
/// `Running` and `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No item received yet.
    Idle,
    /// Items are being received and dispatched.
    Running,
    /// Input is exhausted; waiting for outstanding tasks.
    Draining,
    /// Every task finished successfully.
    Completed,
    /// A task failed and its siblings were cancelled.
    Aborted,
}

impl RunState {
    /// Returns `true` for `Completed` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns the state reached after `event`, or `None` if the transition
    /// is not part of the lifecycle.
    pub fn on(self, event: RunEvent) -> Option<Self> {
        use RunEvent::*;
        use RunState::*;

        match (self, event) {
            (Idle, ItemReceived) | (Running, ItemReceived) => Some(Running),
            (Idle, InputClosed) | (Running, InputClosed) => Some(Draining),
            (Draining, TasksJoined) => Some(Completed),
            (Running, TaskFailed) | (Draining, TaskFailed) => Some(Aborted),
            // Cancellation before the first item still has to be reported.
            (Idle, TaskFailed) => Some(Aborted),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// Events driving [`RunState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    ItemReceived,
    InputClosed,
    TasksJoined,
    TaskFailed,
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items received from the input queue.
    pub received: u64,
    /// Worker function invocations that returned successfully.
    pub completed: u64,
    /// Results sent to the output queue.
    pub forwarded: u64,
    /// Tokens in the pool once every task was joined.
    pub tokens_returned: usize,
    /// Final state of the run.
    pub state: RunState,
}
