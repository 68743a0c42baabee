//! Crate-wide tuning constants.
//!
//! All of these are `pub(crate)` rather than public API: the spec treats
//! them as tuning knobs, not part of the external contract, with the single
//! exception of the hazard domain's shard count, which is exposed as a
//! `const` generic parameter on [`HazardDomain`](crate::domain::HazardDomain)
//! rather than a value in this module.

/// Number of slots in each queue node.
pub const SLOTS_PER_NODE: usize = 1024;

/// Assumed cache line size used for alignment throughout the crate.
pub const CACHE_LINE: usize = 64;

/// Base reclamation threshold: a reclamation pass is attempted once the
/// retired count reaches `max(RECLAIM_THRESHOLD_BASE, hazard_record_count *
/// HAZARD_COUNT_MULTIPLIER)`.
pub(crate) const RECLAIM_THRESHOLD_BASE: isize = 1000;

/// Multiplier applied to the live hazard-record count when computing the
/// dynamic reclamation threshold.
pub(crate) const HAZARD_COUNT_MULTIPLIER: isize = 2;

/// Capacity of each thread's local cache of hazard records.
pub(crate) const THREAD_CACHE_CAPACITY: usize = 8;
