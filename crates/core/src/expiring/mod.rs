//! Lazily computed values that expire.
//!
//! An [`ExpiringLazy`] computes its value on first access and recomputes it
//! on the first access after `valid_for` has passed. Values that should not
//! outlive their expiry can be registered with a [`SweepRegistry`], which
//! periodically drops expired values from a background task it owns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Slot<T> {
    value: Option<Arc<T>>,
    expires_at: Instant,
}

/// A value computed on demand and recomputed after it expires.
pub struct ExpiringLazy<T> {
    valid_for: Duration,
    init: Box<dyn Fn() -> T + Send + Sync>,
    slot: Mutex<Slot<T>>,
}

impl<T> fmt::Debug for ExpiringLazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringLazy")
            .field("valid_for", &self.valid_for)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl<T> ExpiringLazy<T> {
    /// Creates an uninitialized value computed by `init`.
    pub fn new<F>(valid_for: Duration, init: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            valid_for,
            init: Box::new(init),
            slot: Mutex::new(Slot {
                value: None,
                expires_at: Instant::now(),
            }),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the current value, computing it if it is missing or expired.
    ///
    /// Concurrent callers wait for a single computation instead of each
    /// running `init`.
    pub fn get(&self) -> Arc<T> {
        let mut slot = self.lock_slot();
        let now = Instant::now();

        if let Some(value) = &slot.value {
            if now <= slot.expires_at {
                return Arc::clone(value);
            }
        }

        let value = Arc::new((self.init)());
        slot.value = Some(Arc::clone(&value));
        slot.expires_at = now + self.valid_for;
        value
    }

    /// Returns `true` if a value is currently held, expired or not.
    pub fn is_initialized(&self) -> bool {
        self.lock_slot().value.is_some()
    }

    /// Drops the held value; the next `get` recomputes it.
    pub fn invalidate(&self) {
        self.lock_slot().value = None;
    }

    /// Drops the held value if it has expired. Returns `true` if a value was
    /// dropped.
    pub fn clear_if_expired(&self) -> bool {
        let mut slot = self.lock_slot();
        if slot.value.is_some() && Instant::now() > slot.expires_at {
            slot.value = None;
            true
        } else {
            false
        }
    }
}

/// Something the [`SweepRegistry`] can clear.
pub trait Sweep: Send + Sync {
    /// Clears expired state. Returns `true` if anything was cleared.
    fn sweep(&self) -> bool;
}

impl<T: Send + Sync> Sweep for ExpiringLazy<T> {
    fn sweep(&self) -> bool {
        self.clear_if_expired()
    }
}

type Entries = Arc<Mutex<Vec<Weak<dyn Sweep>>>>;

fn sweep_entries(entries: &Entries) -> usize {
    let mut entries = entries
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut cleared = 0;

    entries.retain(|entry| match entry.upgrade() {
        Some(live) => {
            if live.sweep() {
                cleared += 1;
            }
            true
        }
        None => false,
    });
    cleared
}

/// Background sweeper for registered expiring values.
///
/// Entries are held weakly; a value dropped by its owner is forgotten on
/// the next sweep.
pub struct SweepRegistry {
    entries: Entries,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweepRegistry {
    /// Starts a sweeper running every `interval`.
    pub fn spawn(interval: Duration) -> Self {
        let entries: Entries = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Self::run(
            Arc::clone(&entries),
            interval,
            shutdown.clone(),
        ));

        Self {
            entries,
            shutdown,
            handle: Some(handle),
        }
    }

    async fn run(entries: Entries, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cleared = sweep_entries(&entries);
                    if cleared > 0 {
                        debug!(cleared, "Cleared expired values");
                    }
                }
            }
        }
        debug!("Sweep registry stopped");
    }

    /// Registers a value for periodic sweeping.
    pub fn register<S: Sweep + 'static>(&self, value: &Arc<S>) {
        let value: Arc<dyn Sweep> = Arc::clone(value) as Arc<dyn Sweep>;
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::downgrade(&value));
    }

    /// Sweeps immediately. Returns the number of values cleared.
    pub fn sweep_now(&self) -> usize {
        sweep_entries(&self.entries)
    }

    /// Number of registered entries, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background task and waits for it.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SweepRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
