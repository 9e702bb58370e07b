//! Fiber identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a fiber.
///
/// Identifiers are allocated from a process-wide counter and are never reused.
/// [`FiberId::NONE`] identifies "no fiber" and is used when an interruption is
/// requested from outside any running fiber (for example by the [`Runtime`]).
///
/// [`Runtime`]: crate::runtime::Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

/// Global fiber ID counter. Zero is reserved for [`FiberId::NONE`].
static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

impl FiberId {
    /// The identifier used when no fiber is responsible for an action.
    pub const NONE: Self = Self(0);

    /// Allocates a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an identifier from a raw sequence number.
    ///
    /// Mostly useful in tests that build [`Cause`](crate::fiber::Cause) values by hand.
    #[inline]
    #[must_use]
    pub const fn from_raw(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Returns the raw sequence number.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`FiberId::NONE`].
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(formatter, "Fiber(none)")
        } else {
            write!(formatter, "Fiber({})", self.0)
        }
    }
}
