//! Structured task scope with fail-fast cancellation.

use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::ProcessError;

/// Tracks spawned tasks, joins them, and cancels the rest on first failure.
///
/// Every spawned future races the scope's cancellation token, so once the
/// scope is cancelled each task stops at its next suspension point and its
/// locals (token leases included) are dropped. Dropping the supervisor
/// aborts whatever is still running.
pub struct TaskSupervisor {
    tasks: JoinSet<Result<(), ProcessError>>,
    cancel: CancellationToken,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    /// Creates an empty scope with its own cancellation token.
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a scope that is cancelled when `parent` is.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
        }
    }

    /// Token that cancels this scope.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of tasks not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no task is waiting to be joined.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns a tracked task.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), ProcessError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProcessError::Cancelled),
                result = task => result,
            }
        });
    }

    /// Waits for the next task to finish.
    ///
    /// Returns `None` when no tasks are left. A panicking task is reported
    /// as [`ProcessError::Panicked`].
    pub async fn join_next(&mut self) -> Option<Result<(), ProcessError>> {
        let joined = self.tasks.join_next().await?;
        Some(joined.unwrap_or_else(|e| Err(join_error(e))))
    }

    /// Waits for every task.
    ///
    /// On the first failure the remaining tasks are cancelled and drained
    /// before that failure is returned.
    pub async fn join_all(mut self) -> Result<(), ProcessError> {
        while let Some(result) = self.join_next().await {
            if let Err(e) = result {
                return Err(self.abort(e).await);
            }
        }
        Ok(())
    }

    /// Cancels every remaining task, waits for them to unwind, and hands back
    /// `cause` as the error of the scope.
    pub async fn abort(&mut self, cause: ProcessError) -> ProcessError {
        debug!(
            remaining = self.tasks.len(),
            cause = cause.kind(),
            "Cancelling remaining tasks"
        );
        self.cancel.cancel();
        while let Some(result) = self.join_next().await {
            if let Err(e) = result {
                if !matches!(e, ProcessError::Cancelled) {
                    debug!(error = %e, "Sibling task failed during abort");
                }
            }
        }
        cause
    }
}

fn join_error(err: JoinError) -> ProcessError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ProcessError::Panicked(message)
    } else {
        ProcessError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_all_success() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut supervisor = TaskSupervisor::new();

        for i in 0..5 {
            let done = Arc::clone(&done);
            supervisor.spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 2)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(supervisor.len(), 5);

        supervisor.join_all().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut supervisor = TaskSupervisor::new();

        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            supervisor.spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        supervisor.spawn(async { Err(ProcessError::OutputClosed) });

        let err = tokio::time::timeout(Duration::from_secs(5), supervisor.join_all())
            .await
            .expect("abort should not wait for sleeping siblings")
            .unwrap_err();
        assert!(matches!(err, ProcessError::OutputClosed));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.spawn(async { panic!("worker exploded") });

        let err = supervisor.join_all().await.unwrap_err();
        match err {
            ProcessError::Panicked(msg) => assert!(msg.contains("worker exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let mut supervisor = TaskSupervisor::with_parent(&parent);
        supervisor.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });

        parent.cancel();
        assert!(supervisor.is_cancelled());
        let err = supervisor.join_all().await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_scope_joins_immediately() {
        let supervisor = TaskSupervisor::default();
        assert!(supervisor.is_empty());
        supervisor.join_all().await.unwrap();
    }
}
