//! Bounded worker pool
//!
//! Caps the number of sandbox runs in flight and the number of requests
//! allowed to wait for a slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Server busy: {waiting} executions already waiting")]
    Saturated { waiting: usize },
    #[error("Worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_queue: usize,
    waiting: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// `capacity` concurrent runs (at least one), at most `max_queue` waiters
    pub fn new(capacity: usize, max_queue: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_queue,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Requests currently waiting for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for a slot. The slot is released when the permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let previously_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiter = WaiterGuard(self.waiting.clone());
        if previously_waiting >= self.max_queue {
            return Err(PoolError::Saturated {
                waiting: previously_waiting,
            });
        }

        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)
    }
}

/// Decrements the waiter count however `acquire` exits, including when
/// its future is dropped
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
