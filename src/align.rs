//! A 128-byte aligned wrapper, the wider sibling of
//! [`crossbeam_utils::CachePadded`] (64 bytes) used where the spec calls for
//! the extra padding to avoid adjacent-line prefetching between a node's
//! `enq_idx`/`deq_idx`/`next`/`items` fields.

use core::alloc::Layout;
use core::ops::{Deref, DerefMut};
use std::alloc::{alloc, handle_alloc_error};

/// Allocates `value` on the heap through the global allocator directly,
/// rather than via `Box::new`, so that an allocation failure has an explicit
/// site to log from before the process aborts.
///
/// `Box::new` alone gives no hook for this: it calls the same global
/// allocator internally but aborts through a path this crate cannot observe.
/// Going through [`alloc`] and [`handle_alloc_error`] ourselves lets every
/// over-aligned allocation (a [`HazardRecord`](crate::hazard::HazardRecord)
/// or a [`Node`](crate::node::Node)) log once before the process dies.
#[cold]
pub(crate) fn alloc_boxed<T>(value: T) -> Box<T> {
    let layout = Layout::new::<T>();
    // SAFETY: `layout` is non-zero-sized for every type this crate boxes.
    let raw = unsafe { alloc(layout) } as *mut T;
    if raw.is_null() {
        log::error!("allocation of {} bytes (align {}) failed, aborting", layout.size(), layout.align());
        handle_alloc_error(layout);
    }

    // SAFETY: `raw` is non-null, correctly aligned for `T`, and owns
    // `layout`'s worth of uninitialized memory; writing `value` into it and
    // handing the result to `Box::from_raw` matches what `Box::new` does
    // internally.
    unsafe {
        raw.write(value);
        Box::from_raw(raw)
    }
}

/// Pads and aligns `T` to 128 bytes, twice the assumed cache line size.
///
/// Unlike [`crossbeam_utils::CachePadded`], whose padding is derived from the
/// target's cache line size (64 or 128 bytes depending on architecture),
/// this type always pads to 128 bytes regardless of target, matching the
/// fixed `FAA_ALIGNMENT` constant of the reference implementation this crate
/// is modeled on.
#[repr(align(128))]
#[derive(Debug, Default)]
pub(crate) struct Align128<T>(T);

impl<T> Align128<T> {
    #[inline]
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for Align128<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Align128<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Align128;
    use core::mem::align_of;

    #[test]
    fn aligns_to_128() {
        assert_eq!(align_of::<Align128<u8>>(), 128);
        assert_eq!(align_of::<Align128<[usize; 1024]>>(), 128);
    }
}
