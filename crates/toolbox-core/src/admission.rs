use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;

/// RAII guard for one admission slot.
///
/// Dropping it is the release: the slot goes straight to the longest-waiting
/// caller if there is one, otherwise back to the pool. Hold it until the
/// job's native process has exited and its temp directory is gone.
pub struct AdmissionPermit {
    /// Owned permit; dropping this struct releases it back to the semaphore.
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish()
    }
}

/// Point-in-time view of the controller, reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionSnapshot {
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub max_concurrent: usize,
}

/// Bounds the number of conversion jobs running at once.
///
/// Backed by tokio's [`Semaphore`], which hands permits out in the order
/// they were requested, so callers beyond capacity are served FIFO. Only
/// [`Self::acquire`] and the permit's `Drop` touch the count.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
}

/// Keeps `waiting` accurate even if the acquiring future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionController {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot, suspending in the FIFO queue while all slots are busy.
    pub async fn acquire(&self) -> Result<AdmissionPermit, EngineError> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(AdmissionPermit { permit });
        }

        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| AdmissionPermit { permit })
            .map_err(|_| EngineError::Unavailable("admission controller closed".into()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            active_jobs: self.capacity - self.semaphore.available_permits(),
            queued_jobs: self.waiting.load(Ordering::SeqCst),
            max_concurrent: self.capacity,
        }
    }
}
