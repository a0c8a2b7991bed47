//! Fixed-size pool of reusable worker tokens.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;

use super::types::ProcessError;

/// A fixed set of worker tokens handed out one task at a time.
///
/// Each semaphore permit corresponds to exactly one token in `slots`. A
/// token is pushed back before its permit is restored, so a task holding a
/// permit always finds a token.
pub struct TokenPool<D> {
    slots: Mutex<Vec<D>>,
    available: Semaphore,
    capacity: usize,
}

impl<D> fmt::Debug for TokenPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl<D> TokenPool<D> {
    /// Creates a pool holding exactly the given tokens.
    pub fn new<I>(tokens: I) -> Arc<Self>
    where
        I: IntoIterator<Item = D>,
    {
        let slots: Vec<D> = tokens.into_iter().collect();
        let capacity = slots.len();
        Arc::new(Self {
            slots: Mutex::new(slots),
            available: Semaphore::new(capacity),
            capacity,
        })
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<D>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits until a token is free and takes it.
    ///
    /// Waiters are not served in any particular order. The token goes back
    /// to the pool when the returned lease is dropped.
    pub async fn acquire(self: &Arc<Self>) -> Result<WorkerLease<D>, ProcessError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| ProcessError::PoolClosed)?;

        let token = self.lock_slots().pop().ok_or(ProcessError::PoolClosed)?;
        permit.forget();

        Ok(WorkerLease {
            token: Some(token),
            pool: Arc::clone(self),
        })
    }

    fn release(&self, token: D) {
        self.lock_slots().push(token);
        self.available.add_permits(1);
    }

    /// Number of tokens the pool was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tokens currently in the pool.
    pub fn available(&self) -> usize {
        self.available.available_permits()
    }

    /// Stops handing out tokens. Pending and future `acquire` calls fail
    /// with [`ProcessError::PoolClosed`]; leases still return their tokens.
    pub fn close(&self) {
        self.available.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.available.is_closed()
    }
}

/// Exclusive use of one worker token.
///
/// Dropping the lease returns the token to its pool. Dropping never blocks,
/// so the token comes back on success, error, panic and cancellation alike.
pub struct WorkerLease<D> {
    token: Option<D>,
    pool: Arc<TokenPool<D>>,
}

impl<D> Deref for WorkerLease<D> {
    type Target = D;

    fn deref(&self) -> &D {
        // Only `drop` takes the token out.
        self.token.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<D> DerefMut for WorkerLease<D> {
    fn deref_mut(&mut self) -> &mut D {
        self.token.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<D: fmt::Debug> fmt::Debug for WorkerLease<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkerLease").field(&self.token).finish()
    }
}

impl<D> Drop for WorkerLease<D> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.pool.release(token);
        }
    }
}
