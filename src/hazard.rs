//! Hazard records: the single-slot publication primitive hazard pointers are
//! built from.
//!
//! A [`HazardRecord`] is never freed once allocated. It belongs to exactly
//! one [`HazardDomain`](crate::domain::HazardDomain) for the life of the
//! process and moves between "in use" and "available" states; see
//! [`domain`](crate::domain) for the list that tracks all records and the
//! stack that tracks the available ones.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

/// The value stored in a [`HazardRecord`] when it protects nothing.
pub(crate) const EMPTY: *mut () = ptr::null_mut();

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardRecord
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single cache-line-aligned atomic pointer slot plus the two intrusive
/// links a [`HazardDomain`](crate::domain::HazardDomain) needs to track it:
/// one through the domain's global record list (for scanning), one through
/// the domain's free-record stack (for pooling).
#[derive(Debug)]
pub(crate) struct HazardRecord {
    /// The pointer currently protected by this record, or [`EMPTY`].
    protected: CachePadded<AtomicPtr<()>>,
    /// Next record in the domain's global, scan-only, grow-only list.
    pub(crate) next: AtomicPtr<HazardRecord>,
    /// Next record in the domain's lock-free available stack. Only ever
    /// touched while the record is not in use.
    pub(crate) next_avail: AtomicPtr<HazardRecord>,
}

impl HazardRecord {
    /// Creates a new, unprotected hazard record.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            protected: CachePadded::new(AtomicPtr::new(EMPTY)),
            next: AtomicPtr::new(ptr::null_mut()),
            next_avail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Loads the currently protected pointer, or `None` if the record is
    /// unprotected.
    #[inline]
    pub(crate) fn protected(&self, order: Ordering) -> Option<ptr::NonNull<()>> {
        ptr::NonNull::new(self.protected.load(order))
    }

    /// Publishes `ptr` as protected with `Release` ordering, the first half
    /// of the load-protect-validate pattern described in
    /// [`HazardHolder::protect`](crate::holder::HazardHolder::protect).
    ///
    /// This store alone does not synchronize with a reclaimer: the caller
    /// must follow it with a `SeqCst` fence before reloading the source for
    /// validation, matching the reference implementation's
    /// `hazptr_reset` + `atomic_thread_fence(seq_cst)` pairing. A `SeqCst`
    /// store here would not be sufficient on its own; only a `SeqCst` fence
    /// on both sides gives the StoreLoad ordering the scan relies on.
    #[inline]
    pub(crate) fn set_protected(&self, ptr: *mut ()) {
        self.protected.store(ptr, Ordering::Release);
    }

    /// Clears the protected pointer with `Release` ordering.
    #[inline]
    pub(crate) fn reset(&self, order: Ordering) {
        self.protected.store(EMPTY, order);
    }
}
