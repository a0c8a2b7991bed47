//! Configuration for the process module.

use serde::{Deserialize, Serialize};

/// Configuration for a processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Number of worker tokens, i.e. the maximum number of concurrent
    /// worker invocations.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the input queue built by callers from this config.
    #[serde(default = "default_queue_capacity")]
    pub input_capacity: usize,

    /// Capacity of the output queue built by callers from this config.
    #[serde(default = "default_queue_capacity")]
    pub output_capacity: usize,

    /// Name used in log records.
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_queue_capacity() -> usize {
    64
}

fn default_name() -> String {
    "pipeline".to_string()
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            input_capacity: default_queue_capacity(),
            output_capacity: default_queue_capacity(),
            name: default_name(),
        }
    }
}

impl ProcessConfig {
    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets both queue capacities.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self.output_capacity = capacity;
        self
    }

    /// Sets the pipeline name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
