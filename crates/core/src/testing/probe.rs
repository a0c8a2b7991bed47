//! Instrumentation for worker functions under test.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ProbeState {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

/// Records how many worker invocations run at the same time.
///
/// Cloning shares the counters.
///
/// # Example
///
/// ```rust,ignore
/// let probe = ConcurrencyProbe::new();
/// let observer = probe.clone();
/// process_n(&input, 3, move |_worker, item| {
///     let observer = observer.clone();
///     async move { observer.observe(work(item)).await }
/// })
/// .await?;
/// assert!(probe.peak() <= 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    state: Arc<ProbeState>,
}

impl ConcurrencyProbe {
    /// Create a new probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of an invocation. The invocation ends when the guard
    /// is dropped.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.state.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs `fut` as one observed invocation.
    pub async fn observe<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.enter();
        fut.await
    }

    /// Invocations running right now.
    pub fn current(&self) -> usize {
        self.state.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations seen.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Total invocations started.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

/// Guard returned by [`ConcurrencyProbe::enter`].
#[derive(Debug)]
pub struct ProbeGuard {
    state: Arc<ProbeState>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.state.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hands out worker tokens that count their own drops.
///
/// Tokens are only dropped when the pool holding them goes away, so after a
/// run has returned `dropped()` equals the number of tokens handed out if
/// none were lost or leaked.
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `n` tokens with ids `0..n`.
    pub fn tokens(&self, n: usize) -> Vec<CountedToken> {
        (0..n)
            .map(|id| CountedToken {
                id,
                drops: Arc::clone(&self.drops),
            })
            .collect()
    }

    /// Tokens dropped so far.
    pub fn dropped(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// A worker token that reports its drop to a [`DropCounter`].
#[derive(Debug)]
pub struct CountedToken {
    id: usize,
    drops: Arc<AtomicUsize>,
}

impl CountedToken {
    /// Identifier of this token.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for CountedToken {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_peak() {
        let probe = ConcurrencyProbe::new();
        let a = probe.enter();
        let b = probe.enter();
        assert_eq!(probe.current(), 2);
        drop(a);
        let c = probe.enter();
        drop(b);
        drop(c);

        assert_eq!(probe.current(), 0);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.calls(), 3);
    }

    #[test]
    fn test_drop_counter() {
        let counter = DropCounter::new();
        let tokens = counter.tokens(3);
        assert_eq!(tokens[2].id(), 2);
        assert_eq!(counter.dropped(), 0);
        drop(tokens);
        assert_eq!(counter.dropped(), 3);
    }
}
