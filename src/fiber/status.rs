//! Observable state of fibers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::FiberId;
use crate::runtime::executor::Executor;
use crate::runtime::fiber_context::FiberContext;

/// Whether the running region of a fiber may be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterruptStatus {
    /// Interruption requests take effect at the next instruction boundary.
    #[default]
    Interruptible,
    /// Interruption requests are latched until the region ends.
    Uninterruptible,
}

impl InterruptStatus {
    /// Returns `true` for [`InterruptStatus::Interruptible`].
    #[inline]
    #[must_use]
    pub const fn is_interruptible(self) -> bool {
        matches!(self, Self::Interruptible)
    }

    /// Maps a boolean flag to a status.
    #[inline]
    #[must_use]
    pub const fn from_flag(interruptible: bool) -> Self {
        if interruptible {
            Self::Interruptible
        } else {
            Self::Uninterruptible
        }
    }
}

/// Lifecycle state of a fiber, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberStatus {
    /// The fiber is executing or queued on the executor.
    Running,
    /// The fiber is waiting for an asynchronous callback.
    Suspended {
        /// Whether an interruption would resume it immediately.
        interruptible: bool,
    },
    /// An interruption was requested and the fiber is winding down.
    Interrupting,
    /// The fiber has produced its exit.
    Done,
}

impl FiberStatus {
    /// Returns `true` for [`FiberStatus::Done`].
    #[inline]
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for FiberStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(formatter, "running"),
            Self::Suspended { interruptible: true } => write!(formatter, "suspended"),
            Self::Suspended {
                interruptible: false,
            } => write!(formatter, "suspended (uninterruptible)"),
            Self::Interrupting => write!(formatter, "interrupting"),
            Self::Done => write!(formatter, "done"),
        }
    }
}

/// A snapshot of the running fiber, obtained with
/// [`Effect::descriptor`](crate::effect::Effect::descriptor).
#[derive(Clone)]
pub struct FiberDescriptor {
    pub(crate) id: FiberId,
    pub(crate) interrupt_status: InterruptStatus,
    pub(crate) interruptors: BTreeSet<FiberId>,
    pub(crate) children: usize,
    pub(crate) context: Arc<FiberContext>,
}

impl FiberDescriptor {
    /// The fiber's identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> FiberId {
        self.id
    }

    /// Interruptibility of the region the snapshot was taken in.
    #[inline]
    #[must_use]
    pub const fn interrupt_status(&self) -> InterruptStatus {
        self.interrupt_status
    }

    /// Fibers that have requested interruption of this fiber so far.
    #[must_use]
    pub const fn interruptors(&self) -> &BTreeSet<FiberId> {
        &self.interruptors
    }

    /// Number of supervised children still running.
    #[inline]
    #[must_use]
    pub const fn children(&self) -> usize {
        self.children
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.context.executor()
    }
}

impl fmt::Debug for FiberDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FiberDescriptor")
            .field("id", &self.id)
            .field("interrupt_status", &self.interrupt_status)
            .field("interruptors", &self.interruptors)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}
