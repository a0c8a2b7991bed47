pub mod chunked;
pub mod config;
pub mod expiring;
pub mod metrics;
pub mod process;
pub mod queue;
pub mod testing;
pub mod watch;

pub use chunked::{ChunkingConfig, DurationChunker};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config, ConfigError,
    OutputConfig, OutputFormat,
};
pub use expiring::{ExpiringLazy, Sweep, SweepRegistry};
pub use process::{
    process, process_and_send, process_and_send_n, process_n, BoxError, Pipeline, ProcessConfig,
    ProcessError, RunState, RunSummary, TaskSupervisor, TokenPool, WorkerLease,
};
pub use queue::{Queue, SendError};
pub use watch::{DirectoryWatcher, WatchError, WatchEvent, WatchKind};

// Re-exported so callers can cancel pipeline runs without a direct dependency.
pub use tokio_util::sync::CancellationToken;
