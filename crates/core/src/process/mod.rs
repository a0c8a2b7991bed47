//! Bounded-concurrency processing of queue items.
//!
//! This module provides the `Pipeline` which coordinates:
//! - Token pool: a fixed set of worker tokens, one per concurrent invocation
//! - Task supervisor: joins per-item tasks and cancels them on first failure
//! - Controller: receives items and spawns one supervised task per item
//! - Forwarder: sends non-empty results to an output queue and closes it
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use nutsandbolts_core::process::process_and_send_n;
//! use nutsandbolts_core::Queue;
//!
//! # async fn example() -> Result<(), nutsandbolts_core::ProcessError> {
//! let input = Queue::bounded(16);
//! let output = Queue::bounded(16);
//!
//! let producer = input.clone();
//! tokio::spawn(async move {
//!     for value in 1..=10_u64 {
//!         let _ = producer.send(value).await;
//!     }
//!     producer.close();
//! });
//!
//! let consumer = output.clone();
//! let printer = tokio::spawn(async move {
//!     while let Some(value) = consumer.recv().await {
//!         println!("{value}");
//!     }
//! });
//!
//! process_and_send_n(&input, 3, &output, |worker, value| async move {
//!     Ok::<_, Infallible>(Some(value * 10 + *worker as u64 + 1))
//! })
//! .await?;
//! let _ = printer.await;
//! # Ok(())
//! # }
//! ```

mod config;
mod pipeline;
mod supervisor;
mod token_pool;
mod types;

pub use config::ProcessConfig;
pub use pipeline::{process, process_and_send, process_and_send_n, process_n, Pipeline};
pub use supervisor::TaskSupervisor;
pub use token_pool::{TokenPool, WorkerLease};
pub use types::{BoxError, ProcessError, RunEvent, RunState, RunSummary};
