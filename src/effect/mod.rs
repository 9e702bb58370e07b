//! Effect descriptions.
//!
//! An [`Effect<R, E, A>`] is an immutable description of a computation that
//! needs an environment `R`, may fail with a typed error `E`, and produces an
//! `A`. Nothing happens until the effect is handed to a
//! [`Runtime`](crate::runtime::Runtime), which interprets it on a fiber.
//!
//! # Single-use values
//!
//! Effects own their continuations as boxed `FnOnce` closures, so an effect
//! value is consumed when it is composed or run. Operations that run the same
//! description several times ([`Effect::retry`], [`Effect::repeat`],
//! [`Effect::forever`]) take a factory that builds a fresh effect per attempt.
//!
//! # Type aliases
//!
//! - [`IO<E, A>`]: no environment requirement
//! - [`UIO<A>`]: no environment, cannot fail with a typed error
//! - [`URIO<R, A>`]: environment `R`, cannot fail with a typed error
//!
//! # Examples
//!
//! ```rust
//! use fibrant::prelude::*;
//!
//! let runtime = Runtime::default();
//! let program: IO<String, i32> = Effect::succeed(20)
//!     .flat_map(|value| Effect::succeed(value + 1))
//!     .map(|value| value * 2);
//!
//! assert_eq!(runtime.run_blocking(program), Exit::Success(42));
//! ```

mod concurrency;
pub(crate) mod core;
mod error;
pub(crate) mod instruction;
mod resource;
#[cfg(feature = "schedule")]
mod retry;

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;

pub use concurrency::Scope;

use crate::fiber::{Cause, Exit, InterruptStatus};
use crate::runtime::fiber_context::Resume;
use instruction::{Instruction, erase, erase_cause};

/// The error type of effects that cannot fail with a typed error.
pub type Never = Infallible;

/// An effect that requires no environment.
pub type IO<E, A> = Effect<(), E, A>;

/// An effect that requires no environment and has no typed failures.
pub type UIO<A> = Effect<(), Never, A>;

/// An effect that requires `R` and has no typed failures.
pub type URIO<R, A> = Effect<R, Never, A>;

/// A lazy, single-use description of a computation.
///
/// See the [module documentation](self) for an overview.
#[must_use = "effects do nothing unless they are run"]
pub struct Effect<R, E, A> {
    instruction: Instruction,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

impl<R, E, A> Effect<R, E, A> {
    #[inline]
    pub(crate) const fn from_instruction(instruction: Instruction) -> Self {
        Self {
            instruction,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn into_instruction(self) -> Instruction {
        self.instruction
    }
}

impl<R, A> Effect<R, Never, A> {
    /// Re-types an infallible effect to any error type.
    #[inline]
    pub fn widen_error<E2>(self) -> Effect<R, E2, A> {
        Effect::from_instruction(self.instruction)
    }
}

impl<R, E, A> fmt::Debug for Effect<R, E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Effect").finish_non_exhaustive()
    }
}

/// Widens an infallible cause to any error type.
pub(crate) fn widen_cause<E>(cause: Cause<Never>) -> Cause<E> {
    cause.map(|never| match never {})
}

// =============================================================================
// Callback
// =============================================================================

/// One-shot resumption handle passed to the registration function of
/// [`Effect::effect_async`] and its variants.
///
/// Completing the callback more than once is impossible (it is consumed);
/// completing it after the waiting fiber was interrupted is silently ignored.
pub struct Callback<R, E, A> {
    resume: Resume,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

impl<R, E: Send + 'static, A: Send + 'static> Callback<R, E, A> {
    pub(crate) const fn new(resume: Resume) -> Self {
        Self {
            resume,
            _marker: PhantomData,
        }
    }

    /// Resumes the fiber with the given effect.
    pub fn call(self, effect: Effect<R, E, A>) {
        self.resume.resume(effect.instruction);
    }

    /// Resumes the fiber with a value.
    pub fn succeed(self, value: A) {
        self.resume.resume(Instruction::Succeed(erase(value)));
    }

    /// Resumes the fiber with a typed failure.
    pub fn fail(self, error: E) {
        self.resume
            .resume(Instruction::Fail(Cause::Fail(erase(error))));
    }

    /// Resumes the fiber with a failure cause.
    pub fn halt(self, cause: Cause<E>) {
        self.resume.resume(Instruction::Fail(erase_cause(cause)));
    }

    /// Resumes the fiber with an exit.
    pub fn done(self, exit: Exit<E, A>) {
        match exit {
            Exit::Success(value) => self.succeed(value),
            Exit::Failure(cause) => self.halt(cause),
        }
    }
}

impl<R, E, A> fmt::Debug for Callback<R, E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Callback").finish_non_exhaustive()
    }
}

// =============================================================================
// InterruptStatusRestore
// =============================================================================

/// Restores the interruptibility that was in effect when
/// [`Effect::uninterruptible_mask`] was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptStatusRestore(InterruptStatus);

impl InterruptStatusRestore {
    /// Runs `effect` with the saved interruptibility.
    pub fn apply<R, E, A>(self, effect: Effect<R, E, A>) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        A: Send + 'static,
    {
        effect.interrupt_status(self.0)
    }

    /// The saved interruptibility.
    #[must_use]
    pub const fn status(self) -> InterruptStatus {
        self.0
    }
}
