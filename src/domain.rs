//! The hazard domain: the process-wide core of the reclamation scheme.
//!
//! A single [`HazardDomain`] owns the global, grow-only list of hazard
//! records (for scanning), the lock-free stack of currently-available
//! records (for reuse), and `SHARDS` sharded stacks of retired-but-not-yet-
//! reclaimed objects. Retiring an object pushes it onto one shard, chosen by
//! hashing its address; reclamation scans all active hazard pointers once
//! and drains every shard in one pass. Only one thread reclaims at a time,
//! serialized by `reclaiming`, the domain's "reclaiming latch".
//!
//! This crate has no use for more than one domain (a data structure in this
//! crate is always reclaimed through [`GLOBAL`]), matching the Non-goal that
//! rules out multi-domain SMR. [`HazardDomain`] itself stays generic so nothing
//! prevents an embedder from building a second, independent domain.

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicBool, AtomicIsize, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::config::{HAZARD_COUNT_MULTIPLIER, RECLAIM_THRESHOLD_BASE};
use crate::hazard::HazardRecord;
use crate::retired::RetireHeader;

/// Default number of retired-object shards; a power of two, as required by
/// [`calc_shard`].
pub const DEFAULT_SHARDS: usize = 8;

/// The shared, process-wide instance used by every [`Queue`](crate::Queue)
/// and [`HazardHolder`](crate::holder::HazardHolder) in this crate.
pub(crate) static GLOBAL: HazardDomain<DEFAULT_SHARDS> = HazardDomain::new();

const EMPTY_SHARD: CachePadded<AtomicPtr<RetireHeader>> =
    CachePadded::new(AtomicPtr::new(ptr::null_mut()));

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardDomain
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A hazard-pointer reclamation domain with a configurable number of
/// retired-object shards.
///
/// `SHARDS` must be a power of two; [`HazardDomain::new`] asserts this.
/// Keeping it a `const` generic parameter (default [`DEFAULT_SHARDS`])
/// resolves the open question of whether a fixed shard count of 8 remains
/// optimal at very high thread counts, without changing the crate's default
/// behaviour.
pub struct HazardDomain<const SHARDS: usize = DEFAULT_SHARDS> {
    /// Grow-only, singly-linked list of every hazard record ever allocated
    /// by this domain. Traversed (never mutated beyond appends) during a
    /// scan.
    hprec_list: AtomicPtr<HazardRecord>,
    /// Lock-free stack of hazard records that are not currently in use.
    hprec_avail: AtomicPtr<HazardRecord>,
    /// Total number of hazard records ever allocated; feeds the dynamic
    /// reclamation threshold.
    hprec_count: AtomicUsize,
    /// Signed count of retired-but-not-yet-reclaimed objects. Signed
    /// because a reclaimer may drain more objects than it claimed,
    /// transiently driving this below zero until the next retirement.
    retired_count: AtomicIsize,
    /// At most one thread may be reclaiming at a time.
    reclaiming: AtomicBool,
    /// Sharded stacks of retired objects, chosen by address hash to reduce
    /// contention on high retirement rates.
    shards: [CachePadded<AtomicPtr<RetireHeader>>; SHARDS],
    /// Scratch buffer of protected addresses built during a scan. Mutated
    /// only by the thread currently holding `reclaiming`, so no further
    /// synchronization is required; see `scan` for the invariant.
    scan_scratch: UnsafeCell<Vec<usize>>,
}

// SAFETY: `scan_scratch` is only ever read or written by the single thread
// that has successfully set `reclaiming` to `true`; `reclaiming` itself
// serializes access exactly as a mutex would.
unsafe impl<const SHARDS: usize> Sync for HazardDomain<SHARDS> {}

impl<const SHARDS: usize> HazardDomain<SHARDS> {
    /// Creates a new, empty domain.
    ///
    /// # Panics
    ///
    /// Panics if `SHARDS` is not a power of two.
    #[inline]
    pub const fn new() -> Self {
        assert!(SHARDS.is_power_of_two(), "HazardDomain SHARDS must be a power of two");
        Self {
            hprec_list: AtomicPtr::new(ptr::null_mut()),
            hprec_avail: AtomicPtr::new(ptr::null_mut()),
            hprec_count: AtomicUsize::new(0),
            retired_count: AtomicIsize::new(0),
            reclaiming: AtomicBool::new(false),
            shards: [EMPTY_SHARD; SHARDS],
            scan_scratch: UnsafeCell::new(Vec::new()),
        }
    }

    /// Acquires an unused hazard record, popping the available stack or
    /// allocating a new one if it is empty.
    #[inline]
    pub(crate) fn acquire_record(&'static self) -> &'static HazardRecord {
        let mut rec = self.hprec_avail.load(Ordering::Acquire);
        while !rec.is_null() {
            let next = unsafe { (*rec).next_avail.load(Ordering::Relaxed) };
            match self.hprec_avail.compare_exchange_weak(
                rec,
                next,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    unsafe { (*rec).next_avail.store(ptr::null_mut(), Ordering::Relaxed) };
                    return unsafe { &*rec };
                }
                Err(current) => rec = current,
            }
        }

        self.allocate_record()
    }

    #[cold]
    fn allocate_record(&'static self) -> &'static HazardRecord {
        log::debug!("hazard record cache miss, allocating a new record");

        let rec: &'static HazardRecord = Box::leak(crate::align::alloc_boxed(HazardRecord::new()));
        let ptr = rec as *const HazardRecord as *mut HazardRecord;

        let mut head = self.hprec_list.load(Ordering::Relaxed);
        loop {
            rec.next.store(head, Ordering::Relaxed);
            match self.hprec_list.compare_exchange_weak(
                head,
                ptr,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        self.hprec_count.fetch_add(1, Ordering::AcqRel);
        rec
    }

    /// Pushes the sublist `head..=tail` onto the available stack in one CAS.
    ///
    /// # Safety
    ///
    /// `head..=tail` must form a consecutively `next_avail`-linked sublist
    /// of records not currently protecting anything and not reachable from
    /// any other thread's thread-local cache.
    pub(crate) unsafe fn release_records(&'static self, head: &HazardRecord, tail: &HazardRecord) {
        let head_ptr = head as *const HazardRecord as *mut HazardRecord;

        let mut old_head = self.hprec_avail.load(Ordering::Relaxed);
        loop {
            tail.next_avail.store(old_head, Ordering::Relaxed);
            match self.hprec_avail.compare_exchange_weak(
                old_head,
                head_ptr,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => old_head = current,
            }
        }
    }

    /// Retires `header`, attaching `reclaim_fn` as the function that will
    /// eventually delete the enclosing object.
    ///
    /// # Safety
    ///
    /// `header` must point at a live object that has just been unlinked from
    /// every structure that could hand out a live reference to it, and
    /// `reclaim_fn` must be safe to call on it once no hazard pointer
    /// protects it any longer.
    pub(crate) unsafe fn retire(
        &'static self,
        mut header: NonNull<RetireHeader>,
        reclaim_fn: unsafe fn(NonNull<RetireHeader>),
    ) {
        header.as_mut().set_reclaim_fn(reclaim_fn);

        // (DOM:1) this `SeqCst` fence ensures the unlink that made `header`
        // unreachable happens-before the object becomes visible to a
        // reclaimer's scan; it synchronizes-with the `SeqCst` fence a
        // reclaimer issues after extracting the shards.
        atomic::fence(Ordering::SeqCst);

        let shard_idx = Self::calc_shard(header.as_ptr() as *const ());
        let shard = &self.shards[shard_idx];

        let obj = header.as_ptr();
        let mut head = shard.load(Ordering::Relaxed);
        loop {
            header.as_mut().next_retired = head;
            match shard.compare_exchange_weak(head, obj, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }

        self.retired_count.fetch_add(1, Ordering::AcqRel);

        let claimed = self.check_threshold();
        if claimed > 0 {
            self.do_reclamation(claimed);
        }
    }

    /// Forces a reclamation pass over everything currently retired,
    /// regardless of whether the threshold has been crossed.
    pub(crate) fn cleanup(&'static self) {
        let mut claimed = self.retired_count.swap(0, Ordering::AcqRel);
        if claimed < 0 {
            self.retired_count.fetch_add(claimed, Ordering::AcqRel);
            claimed = 0;
        }
        self.do_reclamation(claimed);
    }

    /// Returns the current count of allocated hazard records, used to scale
    /// the dynamic reclamation threshold.
    #[inline]
    fn record_count(&self) -> usize {
        self.hprec_count.load(Ordering::Acquire)
    }

    fn threshold(&self) -> isize {
        let dynamic = self.record_count() as isize * HAZARD_COUNT_MULTIPLIER;
        dynamic.max(RECLAIM_THRESHOLD_BASE)
    }

    /// Attempts to claim the currently retired count by atomically resetting
    /// it to zero. Returns the claimed count, or `0` if the threshold has
    /// not been crossed.
    fn check_threshold(&self) -> isize {
        let mut count = self.retired_count.load(Ordering::Acquire);
        let mut thresh = self.threshold();

        while count >= thresh {
            match self.retired_count.compare_exchange_weak(
                count,
                0,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return count,
                Err(current) => count = current,
            }
            thresh = self.threshold();
        }

        0
    }

    fn do_reclamation(&'static self, claimed_count: isize) {
        if self.reclaiming.swap(true, Ordering::Acquire) {
            // Another thread is already reclaiming; hand our claimed count
            // back so it gets absorbed on that thread's next iteration.
            if claimed_count != 0 {
                self.retired_count.fetch_add(claimed_count, Ordering::AcqRel);
            }
            return;
        }

        log::trace!("entering reclamation pass, claimed {claimed_count} retired objects");
        let mut rcount = claimed_count;
        let mut total_reclaimed: usize = 0;

        loop {
            let mut extracted: [*mut RetireHeader; SHARDS] = [ptr::null_mut(); SHARDS];
            let mut extracted_any = false;

            for (i, shard) in self.shards.iter().enumerate() {
                let head = shard.swap(ptr::null_mut(), Ordering::Acquire);
                extracted[i] = head;
                extracted_any |= !head.is_null();
            }

            if extracted_any {
                // (DOM:2) this `SeqCst` fence synchronizes-with (HAZ:1): it
                // makes every hazard pointer published before this point
                // visible to the scan that follows.
                atomic::fence(Ordering::SeqCst);

                let scratch = unsafe { &mut *self.scan_scratch.get() };
                scratch.clear();

                let mut rec = self.hprec_list.load(Ordering::Acquire);
                while !rec.is_null() {
                    if let Some(protected) = unsafe { (*rec).protected(Ordering::Acquire) } {
                        scratch.push(protected.as_ptr() as usize);
                    }
                    rec = unsafe { (*rec).next.load(Ordering::Acquire) };
                }
                scratch.sort_unstable();

                let mut remaining_head: *mut RetireHeader = ptr::null_mut();
                let mut remaining_tail: *mut RetireHeader = ptr::null_mut();

                for &list in extracted.iter() {
                    let mut current = list;
                    while !current.is_null() {
                        let next = unsafe { (*current).next_retired };
                        let addr = current as usize;

                        if scratch.binary_search(&addr).is_ok() {
                            unsafe { (*current).next_retired = ptr::null_mut() };
                            if remaining_head.is_null() {
                                remaining_head = current;
                                remaining_tail = current;
                            } else {
                                unsafe { (*remaining_tail).next_retired = current };
                                remaining_tail = current;
                            }
                        } else {
                            unsafe { RetireHeader::reclaim(NonNull::new_unchecked(current)) };
                            total_reclaimed += 1;
                            rcount -= 1;
                        }

                        current = next;
                    }
                }

                if !remaining_head.is_null() {
                    let shard0 = &self.shards[0];
                    let mut head = shard0.load(Ordering::Relaxed);
                    loop {
                        unsafe { (*remaining_tail).next_retired = head };
                        match shard0.compare_exchange_weak(
                            head,
                            remaining_head,
                            Ordering::Release,
                            Ordering::Relaxed,
                        ) {
                            Ok(_) => break,
                            Err(current) => head = current,
                        }
                    }
                }
            }

            if rcount != 0 {
                self.retired_count.fetch_add(rcount, Ordering::AcqRel);
            }

            rcount = self.check_threshold();
            if rcount == 0 {
                let all_empty =
                    self.shards.iter().all(|shard| shard.load(Ordering::Acquire).is_null());
                if all_empty {
                    break;
                }
            }
        }

        log::trace!("reclamation pass complete, reclaimed {total_reclaimed} objects");
        self.reclaiming.store(false, Ordering::Release);
    }

    /// Computes the shard index for an object's address: the low bits are
    /// skipped because allocations are already aligned, and `SHARDS` is a
    /// power of two so a mask suffices in place of a modulo.
    #[inline]
    fn calc_shard(ptr: *const ()) -> usize {
        debug_assert!(SHARDS.is_power_of_two());
        ((ptr as usize) >> 4) & (SHARDS - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    struct Tracked {
        header: RetireHeader,
    }

    unsafe fn reclaim_tracked(header: NonNull<RetireHeader>) {
        DROPPED.fetch_add(1, Ordering::Relaxed);
        drop(Box::from_raw(header.as_ptr() as *mut Tracked));
    }

    #[test]
    fn retire_below_threshold_is_not_reclaimed_immediately() {
        DROPPED.store(0, Ordering::Relaxed);
        let domain: HazardDomain<8> = HazardDomain::new();
        // leak the domain as 'static for the duration of this test, mirroring
        // how `GLOBAL` is used in practice.
        let domain: &'static HazardDomain<8> = Box::leak(Box::new(domain));

        let obj = Box::new(Tracked { header: RetireHeader::new() });
        let header = NonNull::from(&Box::leak(obj).header);

        unsafe { domain.retire(header, reclaim_tracked) };
        assert_eq!(DROPPED.load(Ordering::Relaxed), 0);

        domain.cleanup();
        assert_eq!(DROPPED.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cleanup_reclaims_many_unprotected_objects() {
        DROPPED.store(0, Ordering::Relaxed);
        let domain: &'static HazardDomain<8> = Box::leak(Box::new(HazardDomain::new()));

        const N: usize = 50;
        for _ in 0..N {
            let obj = Box::new(Tracked { header: RetireHeader::new() });
            let header = NonNull::from(&Box::leak(obj).header);
            unsafe { domain.retire(header, reclaim_tracked) };
        }

        domain.cleanup();
        assert_eq!(DROPPED.load(Ordering::Relaxed), N);
    }

    #[test]
    fn protected_object_survives_cleanup() {
        DROPPED.store(0, Ordering::Relaxed);
        let domain: &'static HazardDomain<8> = Box::leak(Box::new(HazardDomain::new()));

        let obj = Box::new(Tracked { header: RetireHeader::new() });
        let leaked = Box::leak(obj);
        let header = NonNull::from(&leaked.header);

        let rec = domain.acquire_record();
        rec.set_protected(leaked as *mut Tracked as *mut ());

        unsafe { domain.retire(header, reclaim_tracked) };
        domain.cleanup();
        assert_eq!(DROPPED.load(Ordering::Relaxed), 0, "protected object must survive cleanup");

        rec.reset(Ordering::Release);
        domain.cleanup();
        assert_eq!(DROPPED.load(Ordering::Relaxed), 1, "unprotected object must be reclaimed");
    }

    #[test]
    fn hazard_reader_writer_stress() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::time::Duration;

        DROPPED.store(0, Ordering::Relaxed);
        let domain: &'static HazardDomain<8> = Box::leak(Box::new(HazardDomain::new()));

        let created = Arc::new(AtomicUsize::new(1));
        let initial = Box::into_raw(Box::new(Tracked { header: RetireHeader::new() }));
        let shared: Arc<AtomicPtr<Tracked>> = Arc::new(AtomicPtr::new(initial));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let rec = domain.acquire_record();
                    while !stop.load(Ordering::Relaxed) {
                        let mut observed = shared.load(Ordering::Relaxed);
                        loop {
                            rec.set_protected(observed as *mut ());
                            atomic::fence(Ordering::SeqCst);
                            let current = shared.load(Ordering::Acquire);
                            if current == observed {
                                break;
                            }
                            observed = current;
                        }
                        if !observed.is_null() {
                            let _ = unsafe { &*observed };
                        }
                        rec.reset(Ordering::Release);
                    }
                    unsafe { domain.release_records(rec, rec) };
                })
            })
            .collect();

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let stop = Arc::clone(&stop);
                let created = Arc::clone(&created);
                std::thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let new_obj = Box::into_raw(Box::new(Tracked { header: RetireHeader::new() }));
                        created.fetch_add(1, Ordering::Relaxed);
                        let old = shared.swap(new_obj, Ordering::AcqRel);
                        let header = NonNull::from(&unsafe { &*old }.header);
                        unsafe { domain.retire(header, reclaim_tracked) };
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Relaxed);
        for w in writers {
            w.join().unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }

        let last = shared.load(Ordering::Relaxed);
        let header = NonNull::from(&unsafe { &*last }.header);
        unsafe { domain.retire(header, reclaim_tracked) };
        domain.cleanup();

        assert_eq!(DROPPED.load(Ordering::Relaxed), created.load(Ordering::Relaxed));
    }
}
