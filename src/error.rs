//! Internal error types.
//!
//! None of these are part of the public API: `spec.md` treats holder misuse
//! and thread-local access failure as undetected programming errors, so this
//! type only exists to let [`crate::holder`] distinguish its two internal
//! failure modes for its own retry logic, exactly as the reference crate's
//! `local::RecycleError` does.

use core::fmt;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RecycleError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Reason a hazard record could not be cached in a thread's local cache.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RecycleError {
    /// The thread-local cache is already at capacity.
    Capacity,
}

impl fmt::Display for RecycleError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecycleError::Capacity => write!(f, "thread local hazard cache is already full"),
        }
    }
}

impl std::error::Error for RecycleError {}
