//! The header embedded in every retirable object.
//!
//! Mirrors `hazptr_obj_t` from the reference implementation: a reclaim
//! function pointer plus an intrusive next-retired link. A data structure
//! that wants its nodes reclaimed through the hazard domain embeds a
//! [`RetireHeader`] as the first field of its node type, so that a cast
//! between `*mut Node` and `*mut RetireHeader` is always valid.

use core::ptr::{self, NonNull};

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetireHeader
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Intrusive header for an object retired through a
/// [`HazardDomain`](crate::domain::HazardDomain).
///
/// Both fields are touched only by the single thread that currently "owns"
/// the object: the retiring thread until it is pushed onto a shard stack,
/// and afterwards the one reclaiming thread that holds the domain's
/// reclaiming latch while it walks an extracted shard list. No atomics are
/// needed for either field as a result, exactly as in the reference C
/// implementation, where `next_retired` and `reclaim` are plain struct
/// members.
pub(crate) struct RetireHeader {
    /// Next object in whichever retired-list (a shard stack, or the
    /// "remaining" sublist built up during a scan) this header currently
    /// belongs to.
    pub(crate) next_retired: *mut RetireHeader,
    /// The function that reclaims (drops and deallocates) the enclosing
    /// object. `None` until [`retire`](crate::domain::HazardDomain::retire)
    /// attaches one.
    reclaim: Option<unsafe fn(NonNull<RetireHeader>)>,
}

impl RetireHeader {
    /// Creates a header for an object that has not yet been retired.
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { next_retired: ptr::null_mut(), reclaim: None }
    }

    /// Attaches the reclaim function that will later delete the enclosing
    /// object. Called once, by the retiring thread, before the header is
    /// published on any shard stack.
    #[inline]
    pub(crate) fn set_reclaim_fn(&mut self, reclaim: unsafe fn(NonNull<RetireHeader>)) {
        self.reclaim = Some(reclaim);
    }

    /// Invokes the attached reclaim function, consuming `header`.
    ///
    /// # Safety
    ///
    /// `header` must point at a live, fully retired object whose reclaim
    /// function has been set, and no hazard pointer may still protect it.
    #[inline]
    pub(crate) unsafe fn reclaim(header: NonNull<RetireHeader>) {
        if let Some(reclaim) = header.as_ref().reclaim {
            reclaim(header);
        }
    }
}
