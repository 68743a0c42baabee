//! Per-thread hazard pointer handles.
//!
//! A [`HazardHolder`] binds one [`HazardRecord`](crate::hazard::HazardRecord)
//! to a thread for as long as the holder lives, reusing that one record
//! across every [`protect`](HazardHolder::protect) / [`reset`](HazardHolder::reset)
//! call instead of acquiring a fresh record per operation. This matches the
//! reference implementation's `hazptr_holder_t`, one of which is embedded
//! per thread id inside [`Queue`](crate::Queue).
//!
//! Each thread additionally keeps a small fixed-capacity cache of recently
//! released records (fast path for repeated holder churn) that is flushed
//! back to the domain when the thread exits. Rust's `thread_local!` already
//! runs a value's `Drop` implementation once, at thread exit, before the
//! thread becomes unobservable to the rest of the process, exactly the
//! teardown guarantee the reference implementation has to build by hand with
//! a `tss_create`/`call_once` pair. No separate registration step is needed
//! here as a result.

use core::cell::RefCell;
use core::ptr;
use core::sync::atomic::{self, AtomicPtr, Ordering};

use arrayvec::ArrayVec;

use crate::config::THREAD_CACHE_CAPACITY;
use crate::domain::GLOBAL;
use crate::error::RecycleError;
use crate::hazard::HazardRecord;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadCache
////////////////////////////////////////////////////////////////////////////////////////////////////

struct ThreadCache {
    records: ArrayVec<&'static HazardRecord, THREAD_CACHE_CAPACITY>,
}

impl ThreadCache {
    #[inline]
    const fn new() -> Self {
        Self { records: ArrayVec::new_const() }
    }

    #[inline]
    fn try_acquire(&mut self) -> Option<&'static HazardRecord> {
        self.records.pop()
    }

    #[inline]
    fn try_release(&mut self, record: &'static HazardRecord) -> Result<(), RecycleError> {
        self.records.try_push(record).map_err(|_| RecycleError::Capacity)
    }
}

impl Drop for ThreadCache {
    /// Flushes every cached record back to the domain's available stack in
    /// one batched release, run automatically when the thread exits.
    #[inline]
    fn drop(&mut self) {
        let mut records = self.records.drain(..);
        let head = match records.next() {
            Some(rec) => rec,
            None => return,
        };

        head.next_avail.store(ptr::null_mut(), Ordering::Relaxed);
        let mut tail = head;
        for rec in records {
            rec.next_avail.store(ptr::null_mut(), Ordering::Relaxed);
            tail.next_avail.store(rec as *const HazardRecord as *mut HazardRecord, Ordering::Relaxed);
            tail = rec;
        }

        // SAFETY: `head..=tail` is a freshly built, consecutively linked
        // sublist of records that are no longer reachable from this thread
        // (we just drained them) and protect nothing (every holder resets
        // its record before returning it to this cache).
        unsafe { GLOBAL.release_records(head, tail) };
    }
}

thread_local! {
    static TLS_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::new());
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardHolder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single-record hazard pointer handle bound to the thread that created
/// it.
///
/// Ownership is exclusive to the thread that called [`HazardHolder::new`];
/// using a holder from a different thread than the one that created it is
/// a programming error and is not detected.
pub struct HazardHolder {
    record: &'static HazardRecord,
}

impl HazardHolder {
    /// Acquires a new holder, preferring the calling thread's local cache
    /// over the domain's shared available stack.
    #[inline]
    pub fn new() -> Self {
        let record = TLS_CACHE
            .with(|cache| cache.borrow_mut().try_acquire())
            .unwrap_or_else(|| GLOBAL.acquire_record());
        record.reset(Ordering::Relaxed);
        Self { record }
    }

    /// Clears the holder's protection with `Release` ordering.
    #[inline]
    pub fn reset(&self) {
        self.record.reset(Ordering::Release);
    }

    /// The load-protect-validate primitive: atomically publishes `src`'s
    /// current value into this holder, then re-validates that it is still
    /// current, retrying if a concurrent writer raced ahead.
    ///
    /// This is a generic function rather than a textual macro so that the
    /// retry loop and the fencing it performs cannot be separated by
    /// inlining at different call sites (the ordering proof depends on both
    /// halves of the pattern living in the same compiled function).
    #[inline]
    pub fn protect<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut observed = src.load(Ordering::Relaxed);
        loop {
            self.record.set_protected(observed as *mut ());
            // (HOL:1) this `SeqCst` fence synchronizes-with the `SeqCst`
            // fence a reclaimer issues before scanning (domain.rs, DOM:2):
            // it is what makes the preceding release store visible to that
            // scan, not the store by itself.
            atomic::fence(Ordering::SeqCst);

            let current = src.load(Ordering::Acquire);
            if current == observed {
                return observed;
            }
            observed = current;
        }
    }
}

impl Default for HazardHolder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HazardHolder {
    #[inline]
    fn drop(&mut self) {
        self.record.reset(Ordering::Release);

        let recycled = TLS_CACHE.with(|cache| cache.borrow_mut().try_release(self.record));
        if recycled.is_err() {
            // SAFETY: `self.record` is a single record, already reset, not
            // reachable from any other thread's cache.
            unsafe { GLOBAL.release_records(self.record, self.record) };
        }
    }
}
