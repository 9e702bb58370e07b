//! # fibrant
//!
//! A cooperative fiber runtime for effect descriptions.
//!
//! ## Overview
//!
//! Programs are built as [`Effect`](effect::Effect) values: immutable
//! descriptions of computations that need an environment, may fail with a
//! typed error, and produce a value. A [`Runtime`](runtime::Runtime)
//! interprets them on lightweight fibers with:
//!
//! - **Stack safety**: arbitrarily long `flat_map` chains run in a
//!   trampolined loop
//! - **Typed failures**: a [`Cause`](fiber::Cause) keeps domain errors,
//!   defects (panics) and interruptions apart, and records concurrent
//!   failures side by side
//! - **Interruption**: fibers can be cancelled from outside; uninterruptible
//!   regions delay cancellation and finalizers always run
//! - **Structured concurrency**: interrupting a fiber interrupts and awaits
//!   the children it forked
//! - **Synchronization**: [`Promise`](sync::Promise), [`Ref`](sync::Ref),
//!   [`RefM`](sync::RefM) and [`Semaphore`](sync::Semaphore)
//! - **Schedules**: composable retry and repeat policies
//!
//! ## Feature Flags
//!
//! - `schedule`: [`Schedule`](schedule::Schedule) and the `retry`, `repeat`
//!   and `forever` drivers (enabled by default)
//! - `full`: enable all features
//!
//! ## Example
//!
//! ```rust
//! use fibrant::prelude::*;
//!
//! let runtime = Runtime::default();
//!
//! let program: IO<String, i32> = Effect::succeed(40)
//!     .fork()
//!     .flat_map(|fiber: Fiber<String, i32>| fiber.join())
//!     .map(|value| value + 2);
//!
//! assert_eq!(runtime.run_blocking(program), Exit::Success(42));
//!
//! let failing: IO<&str, i32> = Effect::fail("boom");
//! assert_eq!(runtime.run_blocking(failing), Exit::fail("boom"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use fibrant::prelude::*;
/// ```
pub mod prelude {
    pub use crate::effect::{Callback, Effect, IO, InterruptStatusRestore, Never, Scope, UIO, URIO};
    pub use crate::fiber::{
        Cause, Defect, Exit, Fiber, FiberDescriptor, FiberFailure, FiberId, FiberRef, FiberStatus,
        InterruptStatus,
    };
    pub use crate::runtime::{Runtime, RuntimeConfig};
    pub use crate::sync::{Promise, Ref, RefM, Semaphore};

    #[cfg(feature = "schedule")]
    pub use crate::schedule::{Decision, Schedule, StepFunction};
}

pub mod effect;
pub mod fiber;
pub mod runtime;
pub mod sync;

#[cfg(feature = "schedule")]
pub mod schedule;
