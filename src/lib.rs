//! A lock-free, unbounded, multi-producer/multi-consumer FIFO queue for
//! opaque, pointer-sized payloads, built on the "Fetch-And-Add Array Queue"
//! design and reclaimed through an internal hazard-pointer domain.
//!
//! The two halves of the crate are [`queue`] (the FAA array queue
//! algorithm) and the combination of [`domain`], [`holder`], [`hazard`] and
//! [`retired`] (the safe memory reclamation substrate that makes a node's
//! lifetime correct under concurrent access). The queue depends on the SMR
//! layer; there is no dependency in the other direction, and the SMR layer
//! is usable on its own by any other retirable data structure through
//! [`retire`] and [`cleanup`].

mod align;
mod config;
mod domain;
mod error;
mod hazard;
mod holder;
mod node;
mod queue;
mod retired;

pub use crate::config::{CACHE_LINE, SLOTS_PER_NODE};
pub use crate::domain::{HazardDomain, DEFAULT_SHARDS};
pub use crate::holder::HazardHolder;
pub use crate::queue::Queue;

use core::ptr::NonNull;

use crate::retired::RetireHeader;

////////////////////////////////////////////////////////////////////////////////////////////////////
// SMR surface for other retirable data structures
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Marks a type as retirable through the crate's global [`HazardDomain`].
///
/// # Safety
///
/// Implementors must be laid out with a [`RetireHeader`] as their first
/// field (for example via `#[repr(C)]`), exactly as [`node::Node`] is, so
/// that a `NonNull<Self>` and the address of that header coincide.
pub unsafe trait Retirable: Sized + 'static {}

// SAFETY: `Node` is `#[repr(C)]` with `header: RetireHeader` as its first
// field.
unsafe impl Retirable for node::Node {}

/// Retires `ptr`, attaching `reclaim` as the function that will eventually
/// run once no hazard pointer can observe it any longer.
///
/// This is the same global domain [`Queue`] retires its own nodes through;
/// it is exposed so other retirable data structures can share it, matching
/// the reference implementation's process-wide `hazptr_domain`.
///
/// # Safety
///
/// `ptr` must point at a live `T` that has just been unlinked from every
/// structure that could hand a live reference to it to another thread, and
/// `reclaim` must be safe to call on it once that is true.
pub unsafe fn retire<T: Retirable>(ptr: NonNull<T>, reclaim: unsafe fn(NonNull<T>)) {
    let header = ptr.cast::<RetireHeader>();
    // SAFETY: `T: Retirable` guarantees `header` and `ptr` share an
    // address; reinterpreting the argument type of a thin function pointer
    // that only ever receives that same address back is sound in practice,
    // the same type erasure the reference implementation gets for free
    // from plain `void *` callbacks.
    let reclaim: unsafe fn(NonNull<RetireHeader>) = core::mem::transmute(reclaim);
    domain::GLOBAL.retire(header, reclaim);
}

/// Forces a reclamation pass over everything currently retired in the
/// global domain, regardless of whether the threshold has been crossed.
pub fn cleanup() {
    domain::GLOBAL.cleanup();
}
