//! Error handling.
//!
//! Typed failures (`Cause::Fail`) are recoverable with the `catch_*` and
//! `fold*` families. Defects and interruptions pass through ordinary error
//! handlers untouched and are only visible to the cause-level combinators
//! such as [`Effect::fold_cause_m`].

use super::Effect;
use super::core::typed_cause;
use super::instruction::{Instruction, unerase};
use crate::fiber::{Cause, Defect, Exit};

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// Handles both outcomes with effects, seeing the full failure cause.
    ///
    /// This is the primitive every other error handler is built from.
    pub fn fold_cause_m<E2, B, F, S>(self, failure: F, success: S) -> Effect<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(Cause<E>) -> Effect<R, E2, B> + Send + 'static,
        S: FnOnce(A) -> Effect<R, E2, B> + Send + 'static,
    {
        Effect::from_instruction(Instruction::Fold {
            effect: Box::new(self.into_instruction()),
            failure: Box::new(move |cause| failure(typed_cause(cause)).into_instruction()),
            success: Box::new(move |value| {
                success(unerase(value)).into_instruction()
            }),
        })
    }

    /// Handles typed failures and successes with effects.
    ///
    /// Defects and interruptions are propagated unchanged. A cause that
    /// holds them next to typed failures is propagated too, without its
    /// typed failures, and `failure` does not run.
    pub fn fold_m<E2, B, F, S>(self, failure: F, success: S) -> Effect<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> Effect<R, E2, B> + Send + 'static,
        S: FnOnce(A) -> Effect<R, E2, B> + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| match cause.into_failure_or_cause() {
                Ok(error) => failure(error),
                Err(cause) => Effect::halt(cause.discard_failures()),
            },
            success,
        )
    }

    /// Handles both outcomes with pure functions, seeing the full cause.
    pub fn fold_cause<E2, B, F, S>(self, failure: F, success: S) -> Effect<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(Cause<E>) -> B + Send + 'static,
        S: FnOnce(A) -> B + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| Effect::succeed(failure(cause)),
            move |value| Effect::succeed(success(value)),
        )
    }

    /// Handles typed failures and successes with pure functions.
    pub fn fold<E2, B, F, S>(self, failure: F, success: S) -> Effect<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> B + Send + 'static,
        S: FnOnce(A) -> B + Send + 'static,
    {
        self.fold_m(
            move |error| Effect::succeed(failure(error)),
            move |value| Effect::succeed(success(value)),
        )
    }

    /// Recovers from typed failures.
    pub fn catch_all<E2, F>(self, handler: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Effect<R, E2, A> + Send + 'static,
    {
        self.fold_m(handler, Effect::succeed)
    }

    /// Recovers from any failure, including defects and interruptions.
    pub fn catch_all_cause<E2, F>(self, handler: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(Cause<E>) -> Effect<R, E2, A> + Send + 'static,
    {
        self.fold_cause_m(handler, Effect::succeed)
    }

    /// Recovers from the first defect of a cause that has no typed failure.
    ///
    /// Typed failures and pure interruptions are propagated unchanged.
    pub fn catch_all_defect<F>(self, handler: F) -> Self
    where
        F: FnOnce(Defect) -> Self + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| {
                let defect = if cause.failed() {
                    None
                } else {
                    cause.defects().first().map(|defect| (*defect).clone())
                };
                match defect {
                    Some(defect) => handler(defect),
                    None => Effect::halt(cause),
                }
            },
            Effect::succeed,
        )
    }

    /// Runs `that` if `self` fails with a typed error.
    pub fn or_else<E2, F>(self, that: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce() -> Effect<R, E2, A> + Send + 'static,
    {
        self.catch_all(move |_| that())
    }

    /// Transforms every typed failure.
    pub fn map_err<E2, F>(self, function: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnMut(E) -> E2 + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| Effect::halt(cause.map(function)),
            Effect::succeed,
        )
    }

    /// Transforms the failure cause.
    pub fn map_cause<E2, F>(self, function: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(Cause<E>) -> Cause<E2> + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| Effect::halt(function(cause)),
            Effect::succeed,
        )
    }

    /// Surfaces typed failures as a `Result` value.
    pub fn either<E2: Send + 'static>(self) -> Effect<R, E2, Result<A, E>> {
        self.fold(Err, Ok)
    }

    /// Surfaces the whole outcome as an [`Exit`] value.
    pub fn exit<E2: Send + 'static>(self) -> Effect<R, E2, Exit<E, A>> {
        self.fold_cause(Exit::Failure, Exit::Success)
    }

    /// Turns a typed failure into a defect.
    pub fn or_die<E2, F>(self, describe: F) -> Effect<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Defect + Send + 'static,
    {
        self.catch_all(move |error| Effect::die(describe(error)))
    }

    /// Runs `function` on a typed failure for its effect, keeping the failure.
    pub fn tap_error<F>(self, function: F) -> Self
    where
        F: FnOnce(&E) -> Effect<R, E, ()> + Send + 'static,
    {
        self.catch_all(move |error| {
            let effect = function(&error);
            effect.flat_map(move |()| Effect::fail(error))
        })
    }
}

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, Result<A, E>> {
    /// Moves an inner `Result` error into the typed failure channel.
    pub fn absolve(self) -> Effect<R, E, A> {
        self.flat_map(|result| match result {
            Ok(value) => Effect::succeed(value),
            Err(error) => Effect::fail(error),
        })
    }
}
