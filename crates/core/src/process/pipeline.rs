//! Pipeline controller and result forwarder.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::queue::Queue;

use super::config::ProcessConfig;
use super::supervisor::TaskSupervisor;
use super::token_pool::{TokenPool, WorkerLease};
use super::types::{BoxError, ProcessError, RunEvent, RunState, RunSummary};

/// State of one run shared with its item tasks.
struct RunShared<D> {
    pool: Arc<TokenPool<D>>,
    /// One permit per token, held for a whole invocation and the send of
    /// its result. Keeps the concurrency bound even if a worker drops its
    /// lease early.
    running: Semaphore,
    received: AtomicU64,
    completed: AtomicU64,
    forwarded: AtomicU64,
}

impl<D> RunShared<D> {
    fn new(pool: Arc<TokenPool<D>>) -> Self {
        let running = Semaphore::new(pool.capacity());
        Self {
            pool,
            running,
            received: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
        }
    }

    /// Waits for an invocation slot and a token.
    async fn checkout(&self) -> Result<(SemaphorePermit<'_>, WorkerLease<D>), ProcessError> {
        let permit = self
            .running
            .acquire()
            .await
            .map_err(|_| ProcessError::PoolClosed)?;
        let lease = self.pool.acquire().await?;
        Ok((permit, lease))
    }
}

/// Current [`RunState`] of a run, logging every transition.
struct RunTracker<'a> {
    pipeline: &'a str,
    state: RunState,
}

impl<'a> RunTracker<'a> {
    fn new(pipeline: &'a str) -> Self {
        Self {
            pipeline,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self, event: RunEvent) {
        match self.state.on(event) {
            Some(next) if next != self.state => {
                debug!(
                    pipeline = %self.pipeline,
                    from = self.state.as_str(),
                    to = next.as_str(),
                    "Pipeline state changed"
                );
                self.state = next;
            }
            Some(_) => {}
            None => warn!(
                pipeline = %self.pipeline,
                state = self.state.as_str(),
                ?event,
                "Ignoring unexpected pipeline event"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Variant {
    Sink,
    Forward,
}

impl Variant {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sink => "sink",
            Self::Forward => "forward",
        }
    }
}

/// Closes the output queue when dropped, so a run that is itself dropped
/// (by a caller-side timeout or `select!`) still ends the output stream.
struct CloseOnDrop<O> {
    output: Queue<O>,
    pipeline: String,
}

impl<O> Drop for CloseOnDrop<O> {
    fn drop(&mut self) {
        if !self.output.close() {
            debug!(pipeline = %self.pipeline, "Output queue was already closed");
        }
    }
}

/// Decrements the active worker gauge when dropped, also on cancellation.
struct ActiveWorker;

impl ActiveWorker {
    fn start() -> Self {
        metrics::ACTIVE_WORKERS.inc();
        Self
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        metrics::ACTIVE_WORKERS.dec();
    }
}

/// Runs one worker invocation and records its metrics.
async fn invoke<Fut, T, Err>(invocation: Fut) -> Result<T, ProcessError>
where
    Fut: Future<Output = Result<T, Err>>,
    Err: Into<BoxError>,
{
    let _active = ActiveWorker::start();
    let timer = metrics::WORKER_DURATION.start_timer();
    let result = invocation.await;
    timer.observe_duration();

    match result {
        Ok(value) => {
            metrics::WORKER_INVOCATIONS
                .with_label_values(&["success"])
                .inc();
            Ok(value)
        }
        Err(e) => {
            metrics::WORKER_INVOCATIONS
                .with_label_values(&["failed"])
                .inc();
            Err(ProcessError::Worker(e.into()))
        }
    }
}

/// A bounded-concurrency run over an input queue.
///
/// Every received item gets its own task. A task waits for one of the
/// worker tokens, calls the worker function with the token and the item,
/// and gives the token back when the call ends. No more invocations than
/// tokens run at a time, even if a worker drops its lease early; tasks
/// themselves are not limited.
///
/// The first failing invocation aborts the run: the remaining tasks are
/// cancelled at their next suspension point and the failure is returned.
pub struct Pipeline<D> {
    tokens: Vec<D>,
    name: String,
    cancel: Option<CancellationToken>,
}

impl Pipeline<usize> {
    /// Creates a pipeline with `workers` index tokens, `0..workers`.
    pub fn with_workers(workers: usize) -> Self {
        Self::new(0..workers)
    }

    /// Creates an index-token pipeline from configuration.
    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::with_workers(config.workers).named(config.name.clone())
    }
}

impl<D: Send + 'static> Pipeline<D> {
    /// Creates a pipeline that hands out the given tokens.
    ///
    /// The number of tokens is the concurrency bound.
    pub fn new<W>(tokens: W) -> Self
    where
        W: IntoIterator<Item = D>,
    {
        Self {
            tokens: tokens.into_iter().collect(),
            name: "pipeline".to_string(),
            cancel: None,
        }
    }

    /// Sets the name used in log records.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cancels the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Number of worker tokens.
    pub fn workers(&self) -> usize {
        self.tokens.len()
    }

    /// Applies `f` to every item of `input` until the queue is closed and
    /// drained.
    ///
    /// `input` is never closed by the run.
    pub async fn run<E, F, Fut, Err>(
        self,
        input: &Queue<E>,
        f: F,
    ) -> Result<RunSummary, ProcessError>
    where
        E: Send + 'static,
        F: Fn(WorkerLease<D>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Err>> + Send + 'static,
        Err: Into<BoxError>,
    {
        let f = Arc::new(f);

        self.drive(input, Variant::Sink, move |shared, item| {
            let f = Arc::clone(&f);
            async move {
                let (_running, lease) = shared.checkout().await?;
                invoke(f(lease, item)).await?;
                shared.completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .await
    }

    /// Applies `f` to every item of `input` and sends each `Some` result to
    /// `output`.
    ///
    /// `output` is closed once the run ends, whether it completed, aborted
    /// or the returned future was dropped, so consumers always observe
    /// end-of-stream. Results sent before an abort stay in the queue.
    /// Delivery order is not related to input order.
    ///
    /// A task keeps its invocation slot until its result is sent, so a
    /// full output queue holds back further invocations.
    pub async fn run_and_send<E, O, F, Fut, Err>(
        self,
        input: &Queue<E>,
        output: &Queue<O>,
        f: F,
    ) -> Result<RunSummary, ProcessError>
    where
        E: Send + 'static,
        O: Send + 'static,
        F: Fn(WorkerLease<D>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<O>, Err>> + Send + 'static,
        Err: Into<BoxError>,
    {
        let f = Arc::new(f);
        let sink = output.clone();
        let _close = CloseOnDrop {
            output: output.clone(),
            pipeline: self.name.clone(),
        };

        self.drive(input, Variant::Forward, move |shared, item| {
            let f = Arc::clone(&f);
            let sink = sink.clone();
            async move {
                let (_running, lease) = shared.checkout().await?;
                let produced = invoke(f(lease, item)).await?;
                shared.completed.fetch_add(1, Ordering::Relaxed);

                if let Some(value) = produced {
                    sink.send(value)
                        .await
                        .map_err(|_| ProcessError::OutputClosed)?;
                    shared.forwarded.fetch_add(1, Ordering::Relaxed);
                    metrics::RESULTS_FORWARDED.inc();
                }
                Ok(())
            }
        })
        .await
    }

    async fn drive<E, S, T>(
        self,
        input: &Queue<E>,
        variant: Variant,
        spawn_item: S,
    ) -> Result<RunSummary, ProcessError>
    where
        S: Fn(Arc<RunShared<D>>, E) -> T,
        T: Future<Output = Result<(), ProcessError>> + Send + 'static,
    {
        let Self {
            tokens,
            name,
            cancel,
        } = self;

        if tokens.is_empty() {
            return Err(ProcessError::NoWorkers);
        }

        let pool = TokenPool::new(tokens);
        let shared = Arc::new(RunShared::new(Arc::clone(&pool)));
        let mut supervisor = match &cancel {
            Some(parent) => TaskSupervisor::with_parent(parent),
            None => TaskSupervisor::new(),
        };
        let cancelled = supervisor.cancellation_token().clone();
        let mut tracker = RunTracker::new(&name);

        info!(
            pipeline = %name,
            variant = variant.as_str(),
            workers = pool.capacity(),
            "Pipeline run started"
        );

        let dispatched: Result<(), ProcessError> = loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break Err(ProcessError::Cancelled),
                Some(joined) = supervisor.join_next(), if !supervisor.is_empty() => {
                    if let Err(e) = joined {
                        break Err(e);
                    }
                }
                item = input.recv() => match item {
                    Some(item) => {
                        tracker.advance(RunEvent::ItemReceived);
                        let seq = shared.received.fetch_add(1, Ordering::Relaxed) + 1;
                        metrics::ITEMS_RECEIVED.inc();
                        debug!(pipeline = %name, item = seq, "Dispatching item");
                        supervisor.spawn(spawn_item(Arc::clone(&shared), item));
                    }
                    None => break Ok(()),
                },
            }
        };

        let joined = match dispatched {
            Ok(()) => {
                tracker.advance(RunEvent::InputClosed);
                debug!(
                    pipeline = %name,
                    outstanding = supervisor.len(),
                    "Input drained, waiting for tasks"
                );
                supervisor.join_all().await
            }
            Err(e) => Err(supervisor.abort(e).await),
        };

        let received = shared.received.load(Ordering::Relaxed);
        let completed = shared.completed.load(Ordering::Relaxed);
        let forwarded = shared.forwarded.load(Ordering::Relaxed);

        match joined {
            Ok(()) => {
                tracker.advance(RunEvent::TasksJoined);
                metrics::PIPELINE_RUNS
                    .with_label_values(&[variant.as_str(), "completed"])
                    .inc();
                info!(
                    pipeline = %name,
                    received,
                    completed,
                    forwarded,
                    "Pipeline run completed"
                );
                Ok(RunSummary {
                    received,
                    completed,
                    forwarded,
                    tokens_returned: pool.available(),
                    state: tracker.state,
                })
            }
            Err(e) => {
                tracker.advance(RunEvent::TaskFailed);
                pool.close();
                metrics::PIPELINE_RUNS
                    .with_label_values(&[variant.as_str(), "aborted"])
                    .inc();
                warn!(
                    pipeline = %name,
                    received,
                    completed,
                    cause = e.kind(),
                    "Pipeline run aborted"
                );
                Err(e)
            }
        }
    }
}

/// Applies `f` to every item of `input`, using one of `workers` per call.
pub async fn process<E, D, W, F, Fut, Err>(
    input: &Queue<E>,
    workers: W,
    f: F,
) -> Result<RunSummary, ProcessError>
where
    E: Send + 'static,
    D: Send + 'static,
    W: IntoIterator<Item = D>,
    F: Fn(WorkerLease<D>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: Into<BoxError>,
{
    Pipeline::new(workers).run(input, f).await
}

/// Like [`process`] with the worker indices `0..workers` as tokens.
pub async fn process_n<E, F, Fut, Err>(
    input: &Queue<E>,
    workers: usize,
    f: F,
) -> Result<RunSummary, ProcessError>
where
    E: Send + 'static,
    F: Fn(WorkerLease<usize>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: Into<BoxError>,
{
    Pipeline::with_workers(workers).run(input, f).await
}

/// Applies `f` to every item of `input` and forwards `Some` results to
/// `output`, closing `output` at the end of the run.
pub async fn process_and_send<E, D, O, W, F, Fut, Err>(
    input: &Queue<E>,
    workers: W,
    output: &Queue<O>,
    f: F,
) -> Result<RunSummary, ProcessError>
where
    E: Send + 'static,
    D: Send + 'static,
    O: Send + 'static,
    W: IntoIterator<Item = D>,
    F: Fn(WorkerLease<D>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>, Err>> + Send + 'static,
    Err: Into<BoxError>,
{
    Pipeline::new(workers).run_and_send(input, output, f).await
}

/// Like [`process_and_send`] with the worker indices `0..workers` as tokens.
pub async fn process_and_send_n<E, O, F, Fut, Err>(
    input: &Queue<E>,
    workers: usize,
    output: &Queue<O>,
    f: F,
) -> Result<RunSummary, ProcessError>
where
    E: Send + 'static,
    O: Send + 'static,
    F: Fn(WorkerLease<usize>, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>, Err>> + Send + 'static,
    Err: Into<BoxError>,
{
    Pipeline::with_workers(workers)
        .run_and_send(input, output, f)
        .await
}
