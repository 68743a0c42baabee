//! The FAA array queue itself.
//!
//! Ports `faaq_create`/`faaq_enqueue`/`faaq_dequeue`/`faaq_destroy` from the
//! reference implementation onto [`Node`] and the hazard-pointer machinery
//! in [`crate::domain`]/[`crate::holder`].

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::config::SLOTS_PER_NODE;
use crate::domain;
use crate::holder::HazardHolder;
use crate::node::{Node, SLOT_EMPTY};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Queue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free, unbounded, multi-producer/multi-consumer FIFO queue of
/// opaque, pointer-sized payloads.
///
/// Callers are identified by a `tid` in `0..max_threads`, fixed for the
/// life of the calling thread's interaction with this queue; each `tid`
/// indexes a dedicated [`HazardHolder`], so acquiring one never contends
/// with another thread.
pub struct Queue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    /// Unique, non-dangling address distinct from any legal payload,
    /// written into a slot a consumer has claimed.
    taken: NonNull<()>,
    max_threads: usize,
    holders: Vec<HazardHolder>,
}

// SAFETY: every field is either an atomic, a `Vec` of `Sync` holders, or
// `taken`, an opaque address that this type never dereferences.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl Queue {
    /// Creates a queue with one hazard holder reserved for each of
    /// `0..max_threads`.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads == 0`.
    pub fn new(max_threads: usize) -> Queue {
        assert!(max_threads > 0, "max_threads must be greater than zero");

        let sentinel = Box::into_raw(Node::empty());
        // A one-byte heap allocation gives `taken` a real, unique address;
        // a zero-sized allocation would not (all ZST allocations may share
        // the same dangling address).
        let taken_storage = Box::leak(Box::new(0u8)) as *mut u8;
        // SAFETY: `Box::leak` never returns null.
        let taken = unsafe { NonNull::new_unchecked(taken_storage as *mut ()) };

        let holders = (0..max_threads).map(|_| HazardHolder::new()).collect();

        Queue { head: AtomicPtr::new(sentinel), tail: AtomicPtr::new(sentinel), taken, max_threads, holders }
    }

    #[inline]
    fn holder(&self, tid: usize) -> &HazardHolder {
        assert!(
            tid < self.max_threads,
            "thread id {tid} out of range (max_threads = {})",
            self.max_threads
        );
        &self.holders[tid]
    }

    /// Appends `item` to the tail of the queue.
    ///
    /// # Panics
    ///
    /// Panics if `item` is the queue's internal taken marker, or if `tid`
    /// is out of range.
    pub fn enqueue(&self, item: NonNull<()>, tid: usize) {
        assert_ne!(item, self.taken, "cannot enqueue the queue's own taken marker");
        let holder = self.holder(tid);

        loop {
            let lt = holder.protect(&self.tail);
            // SAFETY: `lt` was just validated by `protect` and the queue
            // never frees a node reachable from `tail` without retiring it
            // through the domain this holder's record is scanned against.
            let node = unsafe { &*lt };

            let i = node.enq_idx().fetch_add(1, Ordering::AcqRel);

            if i < SLOTS_PER_NODE {
                let slot = node.slot(i);
                match slot.compare_exchange(
                    SLOT_EMPTY,
                    item.as_ptr(),
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        holder.reset();
                        return;
                    }
                    Err(_) => {
                        // A consumer already poisoned this slot with the
                        // taken marker; our claimed index is wasted, retry.
                        holder.reset();
                        continue;
                    }
                }
            }

            // Slow path: this node is closed to further claims.
            if self.tail.load(Ordering::Acquire) != lt {
                holder.reset();
                continue;
            }

            let next = node.next().load(Ordering::Acquire);
            if next.is_null() {
                let new_node = Box::into_raw(Node::seeded(item));
                match node.next().compare_exchange(
                    ptr::null_mut(),
                    new_node,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Best-effort: if this fails, some other thread
                        // already advanced `tail` for us.
                        let _ =
                            self.tail.compare_exchange(lt, new_node, Ordering::AcqRel, Ordering::Relaxed);
                        holder.reset();
                        return;
                    }
                    Err(_) => {
                        // SAFETY: `new_node` was never published anywhere.
                        unsafe { drop(Box::from_raw(new_node)) };
                        holder.reset();
                        continue;
                    }
                }
            } else {
                let _ = self.tail.compare_exchange(lt, next, Ordering::AcqRel, Ordering::Relaxed);
                holder.reset();
                continue;
            }
        }
    }

    /// Removes and returns the item at the head of the queue, or `None` if
    /// the queue is currently empty.
    ///
    /// # Panics
    ///
    /// Panics if `tid` is out of range.
    pub fn dequeue(&self, tid: usize) -> Option<NonNull<()>> {
        let holder = self.holder(tid);

        loop {
            let lh = holder.protect(&self.head);
            // SAFETY: see `enqueue`.
            let node = unsafe { &*lh };

            let deq = node.deq_idx().load(Ordering::Acquire);
            let enq = node.enq_idx().load(Ordering::Acquire);
            let next = node.next().load(Ordering::Acquire);

            if deq >= enq && next.is_null() {
                holder.reset();
                return None;
            }

            let i = node.deq_idx().fetch_add(1, Ordering::AcqRel);

            if i < SLOTS_PER_NODE {
                let slot = node.slot(i);
                let prev = slot.swap(self.taken.as_ptr(), Ordering::Acquire);
                if prev != SLOT_EMPTY {
                    holder.reset();
                    // SAFETY: every non-empty, non-taken slot value is a
                    // payload pointer supplied to `enqueue`, which requires
                    // `NonNull`.
                    return Some(unsafe { NonNull::new_unchecked(prev) });
                }

                // The producer claimed this index but has not yet written
                // it; back off and let it catch up.
                holder.reset();
                std::thread::yield_now();
                continue;
            }

            // Slow path: this node is drained.
            let next = node.next().load(Ordering::Acquire);
            if next.is_null() {
                holder.reset();
                return None;
            }

            match self.head.compare_exchange(lh, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => {
                    // Reset before retiring: the sooner this holder stops
                    // protecting the old head, the sooner a scan can free it.
                    holder.reset();
                    // SAFETY: `lh` was just unlinked from `head` by this
                    // thread's successful CAS and is retired exactly once.
                    unsafe {
                        let old_head = Box::from_raw(lh);
                        domain::GLOBAL.retire(old_head.into_header(), Node::reclaim);
                    }
                    continue;
                }
                Err(_) => {
                    holder.reset();
                    continue;
                }
            }
        }
    }
}

impl Drop for Queue {
    /// Assumes quiescence: drains the queue under `tid = 0`, frees the
    /// remaining sentinel directly (no other thread can be observing it),
    /// destroys every holder, frees the taken marker, and forces a final
    /// domain cleanup to reclaim anything retired during the drain.
    fn drop(&mut self) {
        while self.dequeue(0).is_some() {}

        let remaining = self.head.load(Ordering::Relaxed);
        if !remaining.is_null() {
            // SAFETY: quiescence is assumed; nothing else can reach this node.
            unsafe { drop(Box::from_raw(remaining)) };
        }

        // Drop every holder now, before the final cleanup pass, so their
        // records are already back on the domain's available stack.
        self.holders.clear();

        // SAFETY: `taken` was allocated by `Queue::new` via `Box::new(0u8)`
        // and is never handed out, so no one else holds a pointer to it.
        unsafe { drop(Box::from_raw(self.taken.as_ptr() as *mut u8)) };

        domain::GLOBAL.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: usize) -> NonNull<()> {
        NonNull::new(Box::into_raw(Box::new(value)) as *mut ()).unwrap()
    }

    unsafe fn free_item(ptr: NonNull<()>) {
        drop(Box::from_raw(ptr.as_ptr() as *mut usize));
    }

    unsafe fn read_item(ptr: NonNull<()>) -> usize {
        *(ptr.as_ptr() as *const usize)
    }

    #[test]
    fn single_threaded_fifo() {
        let queue = Queue::new(1);
        let values = [10usize, 20, 30];
        let items: Vec<_> = values.iter().map(|&v| item(v)).collect();

        for &it in &items {
            queue.enqueue(it, 0);
        }

        for &v in &values {
            let got = queue.dequeue(0).expect("expected an item");
            assert_eq!(unsafe { read_item(got) }, v);
            unsafe { free_item(got) };
        }

        assert!(queue.dequeue(0).is_none());
    }

    #[test]
    fn boundary_cross_single_node() {
        let queue = Queue::new(1);
        let n = SLOTS_PER_NODE * 2 + 50;

        for v in 0..n {
            queue.enqueue(item(v), 0);
        }
        for v in 0..n {
            let got = queue.dequeue(0).expect("expected an item");
            assert_eq!(unsafe { read_item(got) }, v);
            unsafe { free_item(got) };
        }

        assert!(queue.dequeue(0).is_none());
    }

    #[test]
    #[should_panic]
    fn enqueue_rejects_taken_marker() {
        let queue = Queue::new(1);
        // Reach into the private field only available within this crate's
        // test module to exercise the precondition check.
        queue.enqueue(queue.taken, 0);
    }

    #[test]
    fn destroy_after_drain_leaves_nothing_enqueued() {
        let queue = Queue::new(2);
        for v in 0..100 {
            queue.enqueue(item(v), 0);
        }
        for _ in 0..100 {
            let got = queue.dequeue(1).unwrap();
            unsafe { free_item(got) };
        }
        drop(queue);
    }
}
