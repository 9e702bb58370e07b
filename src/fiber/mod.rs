//! Fibers and their outcomes.
//!
//! A fiber is a lightweight thread of execution that interprets one
//! [`Effect`](crate::effect::Effect). Fibers are cheap to create, are
//! scheduled cooperatively on the runtime's executor, and end exactly once
//! with an [`Exit`]: a value, or a [`Cause`] explaining why there is none.
//!
//! - [`Fiber`]: a handle for awaiting, joining and interrupting a fiber
//! - [`FiberId`]: a process-unique identity, also used to attribute
//!   interruptions
//! - [`FiberRef`]: fiber-local state with fork and join semantics
//! - [`FiberDescriptor`]: a snapshot of the running fiber

mod cause;
mod exit;
pub(crate) mod fiber_ref;
pub(crate) mod handle;
mod id;
mod status;

pub use cause::{Cause, Defect, Leaves};
pub use exit::{Exit, FiberFailure};
pub use fiber_ref::FiberRef;
pub use handle::Fiber;
pub use id::FiberId;
pub use status::{FiberDescriptor, FiberStatus, InterruptStatus};
