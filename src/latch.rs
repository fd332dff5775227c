//! Per-node reader/writer latches.
//!
//! Latch crabbing acquires a latch in one function and releases it in
//! another, so lexically scoped guards do not fit. [`RwLatch`] wraps
//! parking_lot's raw reader/writer lock and exposes explicit acquire and
//! release pairs; the release methods are `unsafe` because the caller
//! asserts that it holds the corresponding latch.

use parking_lot::lock_api::RawRwLock as RawRwLockApi;
use parking_lot::RawRwLock;

/// A reader/writer latch guarding a single node.
///
/// Short-lived by design: held for the duration of one descent step or one
/// structural modification, never across user-visible operations.
pub(crate) struct RwLatch {
    raw: RawRwLock,
}

impl RwLatch {
    pub(crate) const fn new() -> Self {
        Self {
            raw: <RawRwLock as RawRwLockApi>::INIT,
        }
    }

    /// Acquire the latch shared, blocking while a writer holds it.
    #[inline]
    pub(crate) fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    /// Acquire the latch exclusive, blocking while any holder remains.
    #[inline]
    pub(crate) fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Release a shared hold.
    ///
    /// # Safety
    ///
    /// The current thread must hold this latch shared.
    #[inline]
    pub(crate) unsafe fn unlock_shared(&self) {
        // SAFETY: forwarded from the caller.
        unsafe { self.raw.unlock_shared() }
    }

    /// Release an exclusive hold.
    ///
    /// # Safety
    ///
    /// The current thread must hold this latch exclusive.
    #[inline]
    pub(crate) unsafe fn unlock_exclusive(&self) {
        // SAFETY: forwarded from the caller.
        unsafe { self.raw.unlock_exclusive() }
    }

    /// Whether any hold, shared or exclusive, is outstanding.
    #[inline]
    pub(crate) fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl std::fmt::Debug for RwLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLatch")
            .field("locked", &self.is_locked())
            .finish()
    }
}
