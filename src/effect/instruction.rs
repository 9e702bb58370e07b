//! The erased instruction tree interpreted by the fiber runtime.
//!
//! [`Effect<R, E, A>`](super::Effect) is a typed façade over [`Instruction`].
//! Values, errors and environments are type-erased (`Box<dyn Any + Send>`)
//! so that a single continuation stack can hold frames of different
//! intermediate types. The typed layer guarantees that every downcast
//! matches, so a failed downcast is an interpreter bug and panics.

use std::any::Any;
use std::sync::Arc;

use crate::fiber::fiber_ref::FiberRefs;
use crate::fiber::{Cause, Defect, Exit, FiberDescriptor, InterruptStatus};
use crate::runtime::fiber_context::{FiberContext, Resume};

/// A type-erased value.
pub(crate) type Erased = Box<dyn Any + Send>;

/// A cause whose typed failures are erased.
pub(crate) type ErasedCause = Cause<Erased>;

/// A type-erased environment, shared between a fiber and its children.
pub(crate) type Environment = Arc<dyn Any + Send + Sync>;

/// Continuation applied to a success value.
pub(crate) type Continuation = Box<dyn FnOnce(Erased) -> Instruction + Send>;

/// Continuation applied to a failure cause.
pub(crate) type FailureHandler = Box<dyn FnOnce(ErasedCause) -> Instruction + Send>;

/// Called once with the erased exit of a forked fiber. Returns `true` if some
/// party was waiting for the result.
pub(crate) type ExitHook = Box<dyn FnOnce(Exit<Erased, Erased>) -> bool + Send>;

/// Builds the typed handle of a freshly forked fiber.
pub(crate) type AttachHandle = Box<dyn FnOnce(&Arc<FiberContext>) -> Erased + Send>;

/// One node of the instruction tree.
pub(crate) enum Instruction {
    /// A pure value.
    Succeed(Erased),
    /// A failure.
    Fail(ErasedCause),
    /// A synchronous side effect. Panics become defects.
    EffectTotal(Box<dyn FnOnce() -> Erased + Send>),
    /// A synchronous side effect whose panics become typed failures.
    EffectPartial {
        thunk: Box<dyn FnOnce() -> Erased + Send>,
        on_panic: Box<dyn FnOnce(Defect) -> Erased + Send>,
    },
    /// Deferred construction of the next instruction.
    Suspend(Box<dyn FnOnce() -> Instruction + Send>),
    /// Monadic sequencing.
    FlatMap(Box<Instruction>, Continuation),
    /// Error handling: exactly one of the two handlers runs.
    Fold {
        effect: Box<Instruction>,
        failure: FailureHandler,
        success: Continuation,
    },
    /// Spawns a child fiber and succeeds with its handle.
    Fork {
        effect: Box<Instruction>,
        daemon: bool,
        on_exit: ExitHook,
        attach: AttachHandle,
    },
    /// Suspends the fiber until the registered callback resumes it.
    ///
    /// The registration may complete synchronously by returning the next
    /// instruction.
    Async(Box<dyn FnOnce(Resume) -> Option<Instruction> + Send>),
    /// Runs the inner instruction in the given interruptibility region.
    InterruptStatus(Box<Instruction>, InterruptStatus),
    /// Reads the current interruptibility.
    CheckInterrupt(Box<dyn FnOnce(InterruptStatus) -> Instruction + Send>),
    /// Reads the environment.
    Read(Box<dyn FnOnce(&Environment) -> Instruction + Send>),
    /// Runs the inner instruction with another environment.
    Provide(Box<Instruction>, Environment),
    /// Reads the running fiber's descriptor.
    Descriptor(Box<dyn FnOnce(FiberDescriptor) -> Instruction + Send>),
    /// Reads or updates the running fiber's fiber-local values.
    FiberRefs(Box<dyn FnOnce(&mut FiberRefs) -> Erased + Send>),
    /// Gives the worker back to the executor before continuing.
    Yield,
}

/// Erases a value.
#[inline]
pub(crate) fn erase<T: Send + 'static>(value: T) -> Erased {
    Box::new(value)
}

/// Recovers a value erased by [`erase`].
///
/// # Panics
///
/// Panics if `T` is not the erased type, which the typed layer rules out.
#[inline]
pub(crate) fn unerase<T: 'static>(value: Erased) -> T {
    *value
        .downcast::<T>()
        .expect("fiber interpreter invariant violated: erased value has an unexpected type")
}

/// Erases the typed failures of a cause.
pub(crate) fn erase_cause<E: Send + 'static>(cause: Cause<E>) -> ErasedCause {
    cause.map(erase)
}

/// Recovers the typed failures of a cause erased by [`erase_cause`].
pub(crate) fn unerase_cause<E: 'static>(cause: ErasedCause) -> Cause<E> {
    cause.map(unerase)
}

/// Recovers a typed exit.
pub(crate) fn unerase_exit<E: 'static, A: 'static>(exit: Exit<Erased, Erased>) -> Exit<E, A> {
    match exit {
        Exit::Success(value) => Exit::Success(unerase(value)),
        Exit::Failure(cause) => Exit::Failure(unerase_cause(cause)),
    }
}

/// Turns an erased exit back into the instruction that produces it.
pub(crate) fn exit_instruction(exit: Exit<Erased, Erased>) -> Instruction {
    match exit {
        Exit::Success(value) => Instruction::Succeed(value),
        Exit::Failure(cause) => Instruction::Fail(cause),
    }
}

/// The erased unit value.
#[inline]
pub(crate) fn unit() -> Instruction {
    Instruction::Succeed(erase(()))
}
