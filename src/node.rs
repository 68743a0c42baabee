//! Queue nodes: fixed-size slot arrays chained Michael–Scott-style.
//!
//! Mirrors `faaq_node_t` from the reference implementation. A node is
//! retired (not freed directly) once unlinked from the queue, so it embeds
//! a [`RetireHeader`] as its first field: `#[repr(C)]` guarantees that a
//! `*mut Node` and the address of that first field coincide, letting
//! [`Queue`](crate::queue::Queue) hand `domain::GLOBAL.retire` a pointer it
//! can later cast back.

use core::array;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::align::Align128;
use crate::config::SLOTS_PER_NODE;
use crate::retired::RetireHeader;

/// Value stored in a slot that has not yet been written by a producer.
pub(crate) const SLOT_EMPTY: *mut () = ptr::null_mut();

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One node in the queue's linked list: `SLOTS_PER_NODE` slots plus the
/// enqueue/dequeue claim counters and the link to the next node.
///
/// Each field beyond the header is wrapped in [`Align128`] so that the
/// indices, the link, and the slot array each start on their own 128-byte
/// boundary, avoiding false sharing between a producer incrementing
/// `enq_idx`, a consumer incrementing `deq_idx`, and the help-your-neighbour
/// CAS traffic on `next`.
#[repr(C)]
pub(crate) struct Node {
    pub(crate) header: RetireHeader,
    enq_idx: Align128<AtomicUsize>,
    deq_idx: Align128<AtomicUsize>,
    next: Align128<AtomicPtr<Node>>,
    items: Align128<[AtomicPtr<()>; SLOTS_PER_NODE]>,
}

impl Node {
    /// Builds an empty node: both indices at zero, every slot empty, no
    /// successor.
    pub(crate) fn empty() -> Box<Node> {
        crate::align::alloc_boxed(Node {
            header: RetireHeader::new(),
            enq_idx: Align128::new(AtomicUsize::new(0)),
            deq_idx: Align128::new(AtomicUsize::new(0)),
            next: Align128::new(AtomicPtr::new(ptr::null_mut())),
            items: Align128::new(array::from_fn(|_| AtomicPtr::new(SLOT_EMPTY))),
        })
    }

    /// Builds a node whose slot 0 already holds `item`, with `enq_idx`
    /// starting at 1. Used when a producer building a successor node wants
    /// to reserve the first slot for itself without a further FAA.
    pub(crate) fn seeded(item: NonNull<()>) -> Box<Node> {
        let node = Self::empty();
        node.slot(0).store(item.as_ptr(), Ordering::Relaxed);
        node.enq_idx.store(1, Ordering::Relaxed);
        node
    }

    #[inline]
    pub(crate) fn enq_idx(&self) -> &AtomicUsize {
        &self.enq_idx
    }

    #[inline]
    pub(crate) fn deq_idx(&self) -> &AtomicUsize {
        &self.deq_idx
    }

    #[inline]
    pub(crate) fn next(&self) -> &AtomicPtr<Node> {
        &self.next
    }

    /// Returns the atomic slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= SLOTS_PER_NODE`; callers only ever index with a
    /// value already checked against `SLOTS_PER_NODE` on the fast path.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &AtomicPtr<()> {
        &(*self.items)[index]
    }

    /// Recovers the enclosing node from a retired-object header that was
    /// produced by [`Node::into_header`].
    ///
    /// # Safety
    ///
    /// `header` must actually point at the `header` field of a live `Node`.
    #[inline]
    pub(crate) unsafe fn from_header(header: NonNull<RetireHeader>) -> NonNull<Node> {
        header.cast()
    }

    /// Leaks `self` and returns a pointer to its embedded header, suitable
    /// for passing to [`HazardDomain::retire`](crate::domain::HazardDomain::retire).
    #[inline]
    pub(crate) fn into_header(self: Box<Node>) -> NonNull<RetireHeader> {
        let raw = Box::into_raw(self);
        // SAFETY: `header` is the first field of a `#[repr(C)]` struct, so
        // its address coincides with `raw`.
        unsafe { NonNull::new_unchecked(raw as *mut RetireHeader) }
    }

    /// Reclaims a node previously retired through [`Node::into_header`].
    ///
    /// # Safety
    ///
    /// `header` must point at the embedded header of a `Node` that is no
    /// longer reachable and no longer protected by any hazard pointer.
    pub(crate) unsafe fn reclaim(header: NonNull<RetireHeader>) {
        drop(Box::from_raw(Self::from_header(header).as_ptr()));
    }
}
