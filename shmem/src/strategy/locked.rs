use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use tracing::info;

use super::{Reservation, Spsc, Strategy};
use crate::core::ring::Ring;
use crate::core::{QueueKind, SharedSegment, ShmemConfig};
use crate::errors::{QueueError, Result};

/// Process-shared mutex living in its own small segment next to the queue.
pub(crate) struct ProducerLock {
    // Declared before the segment so it goes away before the mapping does.
    mutex: Box<dyn LockImpl>,
    _segment: SharedSegment,
}

// The pthread mutex is process-shared; the handle is only used by one thread at a time.
unsafe impl Send for ProducerLock {}

impl ProducerLock {
    pub(crate) fn open(cfg: &ShmemConfig, ownership: bool) -> Result<ProducerLock> {
        let link = cfg.lock_link_path();
        let segment = SharedSegment::create_or_attach(&link, Mutex::size_of(None), ownership)?;
        let base = segment.as_ptr();
        let (mutex, _) = unsafe {
            if segment.is_owner() {
                Mutex::new(base, base)
            } else {
                Mutex::from_existing(base, base)
            }
        }
        .map_err(|e| QueueError::Lock(e.to_string()))?;
        info!(link = %link.display(), owner = segment.is_owner(), "producer lock ready");
        Ok(ProducerLock {
            mutex,
            _segment: segment,
        })
    }

    pub(crate) fn acquire(&self) -> Result<LockGuard<'_>> {
        self.mutex
            .lock()
            .map_err(|e| QueueError::Lock(e.to_string()))
    }
}

/// SPSC records written by many producers, one at a time.
///
/// The mutex is held across reserve, payload copy and commit, so the consumer
/// sees exactly what a single producer would have produced. It never takes
/// the lock itself.
pub(crate) struct MpscLocked {
    inner: Spsc,
    lock: ProducerLock,
}

impl MpscLocked {
    pub(crate) fn new(inner: Spsc, lock: ProducerLock) -> MpscLocked {
        MpscLocked { inner, lock }
    }
}

impl Strategy for MpscLocked {
    fn kind(&self) -> QueueKind {
        QueueKind::MpscLocked
    }

    /// Unlocked. Producers must go through `enqueue`, which holds the mutex
    /// from reserve to commit.
    fn reserve(&self, ring: &Ring, len: usize) -> Result<Option<Reservation>> {
        self.inner.reserve(ring, len)
    }

    /// Unlocked, see `reserve`.
    fn commit(&self, ring: &Ring, reservation: Reservation, len: usize) -> Result<()> {
        self.inner.commit(ring, reservation, len)
    }

    fn consume(&self, ring: &Ring, buf: &mut [u8]) -> Result<Option<usize>> {
        self.inner.consume(ring, buf)
    }

    fn enqueue(&self, ring: &Ring, message: &[u8]) -> Result<bool> {
        // Tail loads inside Spsc are relaxed; the mutex orders them against
        // the previous holder's tail store.
        let _guard = self.lock.acquire()?;
        self.inner.enqueue(ring, message)
    }
}

