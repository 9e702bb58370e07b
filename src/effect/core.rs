//! Constructors, sequencing, interruption control and environment access.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use super::instruction::{Environment, Instruction, erase, erase_cause, unerase, unerase_cause};
use super::{Callback, Effect, InterruptStatusRestore, Never};
use crate::fiber::{Cause, Defect, Exit, FiberDescriptor, FiberId, InterruptStatus};

// =============================================================================
// Constructors
// =============================================================================

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// An effect that succeeds with `value`.
    #[inline]
    pub fn succeed(value: A) -> Self {
        Self::from_instruction(Instruction::Succeed(erase(value)))
    }

    /// An effect that fails with the typed error `error`.
    #[inline]
    pub fn fail(error: E) -> Self {
        Self::from_instruction(Instruction::Fail(Cause::Fail(erase(error))))
    }

    /// An effect that fails with `cause`.
    #[inline]
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_instruction(Instruction::Fail(erase_cause(cause)))
    }

    /// An effect that dies with `defect`.
    #[inline]
    pub fn die(defect: Defect) -> Self {
        Self::halt(Cause::Die(defect))
    }

    /// An effect that dies with a defect built from `message`.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::halt(Cause::die_message(message))
    }

    /// An effect that reproduces `exit`.
    pub fn done(exit: Exit<E, A>) -> Self {
        match exit {
            Exit::Success(value) => Self::succeed(value),
            Exit::Failure(cause) => Self::halt(cause),
        }
    }

    /// A synchronous side effect that never fails with a typed error.
    ///
    /// A panic inside `thunk` becomes a defect.
    pub fn effect_total<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_instruction(Instruction::EffectTotal(Box::new(move || erase(thunk()))))
    }

    /// A synchronous side effect whose panics are mapped into typed errors.
    pub fn effect_partial<F, H>(thunk: F, on_panic: H) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
        H: FnOnce(Defect) -> E + Send + 'static,
    {
        Self::from_instruction(Instruction::EffectPartial {
            thunk: Box::new(move || erase(thunk())),
            on_panic: Box::new(move |defect| erase(on_panic(defect))),
        })
    }

    /// A synchronous side effect that reports failure through `Result`.
    pub fn from_result<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
    {
        Self::suspend(move || match thunk() {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        })
    }

    /// Defers the construction of an effect until it runs.
    pub fn suspend<F>(factory: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Suspend(Box::new(move || {
            factory().into_instruction()
        })))
    }

    /// An effect that never completes. It can still be interrupted.
    pub fn never() -> Self {
        Self::from_instruction(Instruction::Async(Box::new(|_resume| None)))
    }

    // =========================================================================
    // Asynchronous boundaries
    // =========================================================================

    /// Suspends the fiber until `register` completes the callback.
    pub fn effect_async<F>(register: F) -> Self
    where
        F: FnOnce(Callback<R, E, A>) + Send + 'static,
    {
        Self::effect_async_maybe(move |callback| {
            register(callback);
            None
        })
    }

    /// Like [`Effect::effect_async`], but `register` may complete
    /// synchronously by returning the effect to continue with.
    pub fn effect_async_maybe<F>(register: F) -> Self
    where
        F: FnOnce(Callback<R, E, A>) -> Option<Self> + Send + 'static,
    {
        Self::from_instruction(Instruction::Async(Box::new(move |resume| {
            register(Callback::new(resume)).map(Self::into_instruction)
        })))
    }

    /// Like [`Effect::effect_async`], but `register` returns a canceler that
    /// runs if the waiting fiber is interrupted before the callback fires.
    pub fn effect_async_interrupt<F>(register: F) -> Self
    where
        F: FnOnce(Callback<R, E, A>) -> Effect<R, Never, ()> + Send + 'static,
    {
        Self::suspend(move || {
            let canceler: Arc<Mutex<Option<Effect<R, Never, ()>>>> = Arc::new(Mutex::new(None));
            let slot = Arc::clone(&canceler);
            Self::effect_async(move |callback| {
                *slot.lock() = Some(register(callback));
            })
            .on_interrupt(Effect::suspend(move || {
                canceler.lock().take().unwrap_or_else(Effect::unit)
            }))
        })
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Runs `self`, then the effect produced by `function` from its value.
    pub fn flat_map<B, F>(self, function: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, B> + Send + 'static,
    {
        Effect::from_instruction(Instruction::FlatMap(
            Box::new(self.into_instruction()),
            Box::new(move |value| function(unerase(value)).into_instruction()),
        ))
    }

    /// Same as [`Effect::flat_map`].
    pub fn and_then<B, F>(self, function: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, B> + Send + 'static,
    {
        self.flat_map(function)
    }

    /// Transforms the success value.
    pub fn map<B, F>(self, function: F) -> Effect<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Effect::from_instruction(Instruction::FlatMap(
            Box::new(self.into_instruction()),
            Box::new(move |value| Instruction::Succeed(erase(function(unerase::<A>(value))))),
        ))
    }

    /// Replaces the success value.
    pub fn as_value<B: Send + 'static>(self, value: B) -> Effect<R, E, B> {
        self.map(move |_| value)
    }

    /// Discards the success value.
    pub fn unit_value(self) -> Effect<R, E, ()> {
        self.map(|_| ())
    }

    /// Runs `self`, then `that`, keeping the value of `that`.
    pub fn then<B: Send + 'static>(self, that: Effect<R, E, B>) -> Effect<R, E, B> {
        self.flat_map(move |_| that)
    }

    /// Runs `self`, then `that`, keeping the value of `self`.
    pub fn zip_left<B: Send + 'static>(self, that: Effect<R, E, B>) -> Self {
        self.flat_map(move |value| that.as_value(value))
    }

    /// Same as [`Effect::then`].
    pub fn zip_right<B: Send + 'static>(self, that: Effect<R, E, B>) -> Effect<R, E, B> {
        self.then(that)
    }

    /// Runs `self`, then `that`, keeping both values.
    pub fn zip<B: Send + 'static>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)> {
        self.flat_map(move |left| that.map(move |right| (left, right)))
    }

    /// Runs `self`, then `that`, combining both values with `function`.
    pub fn zip_with<B, C, F>(self, that: Effect<R, E, B>, function: F) -> Effect<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |left| that.map(move |right| function(left, right)))
    }

    /// Runs `function` on the success value for its effect, keeping the value.
    pub fn tap<B, F>(self, function: F) -> Self
    where
        B: Send + 'static,
        F: FnOnce(&A) -> Effect<R, E, B> + Send + 'static,
    {
        self.flat_map(move |value| {
            let effect = function(&value);
            effect.map(move |_| value)
        })
    }

    /// Runs the effects one after another and collects their values.
    ///
    /// Stops at the first failure.
    pub fn collect_all<I>(effects: I) -> Effect<R, E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        effects
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |collected, effect| {
                collected.zip_with(effect, |mut values, value| {
                    values.push(value);
                    values
                })
            })
    }

    /// Applies `function` to every item and runs the effects in order.
    pub fn foreach<I, F>(items: I, function: F) -> Effect<R, E, Vec<A>>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Self,
    {
        Self::collect_all(items.into_iter().map(function))
    }

    // =========================================================================
    // Interruption
    // =========================================================================

    /// Runs `self` in the given interruptibility region.
    pub fn interrupt_status(self, status: InterruptStatus) -> Self {
        Self::from_instruction(Instruction::InterruptStatus(
            Box::new(self.into_instruction()),
            status,
        ))
    }

    /// Runs `self` so that interruption requests are latched until it ends.
    pub fn uninterruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Uninterruptible)
    }

    /// Runs `self` so that interruption requests take effect immediately.
    pub fn interruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Interruptible)
    }

    /// Builds an effect from the current interruptibility.
    pub fn check_interruptible<F>(function: F) -> Self
    where
        F: FnOnce(InterruptStatus) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::CheckInterrupt(Box::new(move |status| {
            function(status).into_instruction()
        })))
    }

    /// Runs the effect built by `function` uninterruptibly, handing it a
    /// [`InterruptStatusRestore`] that re-enables the surrounding
    /// interruptibility for sub-regions.
    pub fn uninterruptible_mask<F>(function: F) -> Self
    where
        F: FnOnce(InterruptStatusRestore) -> Self + Send + 'static,
    {
        Self::check_interruptible(move |status| {
            function(InterruptStatusRestore(status)).uninterruptible()
        })
    }

    /// Fails with an interruption by the current fiber.
    pub fn interrupt() -> Self {
        Self::descriptor_with(|descriptor| Self::interrupt_as(descriptor.id()))
    }

    /// Fails with an interruption by `fiber_id`.
    pub fn interrupt_as(fiber_id: FiberId) -> Self {
        Self::halt(Cause::Interrupt(fiber_id))
    }

    // =========================================================================
    // Fiber introspection
    // =========================================================================

    /// Builds an effect from the running fiber's descriptor.
    pub fn descriptor_with<F>(function: F) -> Self
    where
        F: FnOnce(FiberDescriptor) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Descriptor(Box::new(move |descriptor| {
            function(descriptor).into_instruction()
        })))
    }

    // =========================================================================
    // Environment
    // =========================================================================

    /// Builds a value from the environment.
    pub fn access<F>(function: F) -> Self
    where
        R: Send + Sync,
        F: FnOnce(&R) -> A + Send + 'static,
    {
        Self::access_m(move |environment| Self::succeed(function(environment)))
    }

    /// Builds an effect from the environment.
    pub fn access_m<F>(function: F) -> Self
    where
        R: Send + Sync,
        F: FnOnce(&R) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Read(Box::new(move |environment| {
            function(downcast_environment::<R>(environment)).into_instruction()
        })))
    }

    /// Satisfies the environment requirement, producing an effect that runs
    /// under any outer environment.
    pub fn provide<R0>(self, environment: R) -> Effect<R0, E, A>
    where
        R: Send + Sync,
    {
        let environment: Environment = Arc::new(environment);
        Effect::from_instruction(Instruction::Provide(
            Box::new(self.into_instruction()),
            environment,
        ))
    }

    /// Runs `self` with an environment derived from the outer one.
    pub fn provide_some<R0, F>(self, function: F) -> Effect<R0, E, A>
    where
        R: Send + Sync,
        R0: Send + Sync + 'static,
        F: FnOnce(&R0) -> R + Send + 'static,
    {
        Effect::<R0, E, A>::access_m(move |outer| self.provide(function(outer)))
    }
}

impl<R: 'static, E: Send + 'static> Effect<R, E, ()> {
    /// An effect that succeeds with `()`.
    #[inline]
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Gives the worker back to the executor so other fibers can run.
    pub fn yield_now() -> Self {
        Self::from_instruction(Instruction::Yield)
    }
}

impl<R: 'static, E: Send + 'static> Effect<R, E, FiberDescriptor> {
    /// Reads the running fiber's descriptor.
    pub fn descriptor() -> Self {
        Self::descriptor_with(|descriptor| Self::succeed(descriptor))
    }
}

impl<R: 'static, E: Send + 'static> Effect<R, E, FiberId> {
    /// Reads the running fiber's identifier.
    pub fn fiber_id() -> Self {
        Self::descriptor_with(|descriptor| Self::succeed(descriptor.id()))
    }
}

impl<R: Clone + Send + Sync + 'static, E: Send + 'static> Effect<R, E, R> {
    /// Reads the whole environment.
    pub fn environment() -> Self {
        Self::access(R::clone)
    }
}

fn downcast_environment<R: 'static>(environment: &Environment) -> &R {
    let environment: &(dyn Any + Send + Sync) = environment.as_ref();
    environment
        .downcast_ref::<R>()
        .expect("fiber interpreter invariant violated: environment has an unexpected type")
}

/// Recovers a typed cause from an erased one, used by handlers that receive
/// the cause of an effect they built.
pub(super) fn typed_cause<E: 'static>(cause: super::instruction::ErasedCause) -> Cause<E> {
    unerase_cause(cause)
}

/// Runs `thunk`, reporting a panic as a defect.
pub(crate) fn catch_defect<T>(thunk: impl FnOnce() -> T) -> Result<T, Defect> {
    catch_unwind(AssertUnwindSafe(thunk)).map_err(Defect::from_panic)
}
