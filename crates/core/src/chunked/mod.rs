//! Time-windowed batching of queue items.
//!
//! A [`DurationChunker`] collects everything that arrives on an input queue
//! during a fixed window and emits it as one `Vec`. Windows without items
//! emit nothing. When the input is closed and drained the pending partial
//! batch is flushed right away and the output queue is closed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::Queue;

/// Configuration for time-windowed batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Capacity of the batch queue.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

fn default_window_ms() -> u64 {
    1000
}

fn default_output_capacity() -> usize {
    16
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            output_capacity: default_output_capacity(),
        }
    }
}

impl ChunkingConfig {
    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Background task turning a queue of items into a queue of batches.
///
/// The task is owned by this handle: dropping it stops the task, and
/// [`shutdown`](Self::shutdown) stops it and waits for it to finish.
pub struct DurationChunker<T> {
    output: Queue<Vec<T>>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> DurationChunker<T> {
    /// Starts batching `input` in windows of `window`.
    ///
    /// Batches go to an unbounded output queue.
    pub fn spawn(input: Queue<T>, window: Duration) -> Self {
        Self::spawn_with_output(input, window, Queue::unbounded())
    }

    /// Starts batching with the settings from `config`.
    pub fn from_config(input: Queue<T>, config: &ChunkingConfig) -> Self {
        Self::spawn_with_output(
            input,
            config.window(),
            Queue::bounded(config.output_capacity),
        )
    }

    /// Starts batching `input` into the given `output` queue.
    pub fn spawn_with_output(input: Queue<T>, window: Duration, output: Queue<Vec<T>>) -> Self {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            input,
            output.clone(),
            window,
            shutdown.clone(),
        ));

        Self {
            output,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Queue receiving the batches.
    pub fn output(&self) -> &Queue<Vec<T>> {
        &self.output
    }

    /// Receives the next batch, `None` once batching has ended.
    pub async fn recv(&self) -> Option<Vec<T>> {
        self.output.recv().await
    }

    /// Stops the background task and waits for it. Items of the current
    /// window are discarded; the output queue is closed.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.output.close();
    }

    async fn run(
        input: Queue<T>,
        output: Queue<Vec<T>>,
        window: Duration,
        shutdown: CancellationToken,
    ) {
        debug!(window_ms = window.as_millis() as u64, "Chunker started");

        'windows: loop {
            let deadline = Instant::now() + window;
            let mut batch = Vec::new();
            let mut input_done = false;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'windows,
                    received = tokio::time::timeout_at(deadline, input.recv()) => match received {
                        Ok(Some(item)) => batch.push(item),
                        Ok(None) => {
                            input_done = true;
                            break;
                        }
                        Err(_elapsed) => break,
                    },
                }
            }

            if !batch.is_empty() {
                let size = batch.len();
                let sent = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'windows,
                    sent = output.send(batch) => sent,
                };
                if sent.is_err() {
                    debug!("Chunk output closed, stopping");
                    break;
                }
                debug!(size, "Emitted chunk");
            }

            if input_done {
                break;
            }
        }

        output.close();
        debug!("Chunker stopped");
    }
}

impl<T> Drop for DurationChunker<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
