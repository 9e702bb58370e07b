//! Running effects again under a [`Schedule`].
//!
//! Each run needs a fresh effect, so the drivers take a factory. Waiting
//! between runs uses [`Effect::sleep`] and is interruptible.

use std::sync::Arc;
use std::time::Duration;

use super::Effect;
use crate::schedule::{Decision, Schedule, StepFunction};

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// Runs the effect built by `factory`, running a new one after each typed
    /// failure for as long as `schedule` continues.
    ///
    /// Defects and interruptions are never retried. When the schedule is
    /// done, the last failure is returned.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use fibrant::prelude::*;
    ///
    /// let attempts = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&attempts);
    /// let program: IO<&str, usize> = Effect::retry(
    ///     move || {
    ///         let counter = Arc::clone(&counter);
    ///         Effect::from_result(move || match counter.fetch_add(1, Ordering::SeqCst) {
    ///             attempt if attempt < 2 => Err("not yet"),
    ///             attempt => Ok(attempt),
    ///         })
    ///     },
    ///     Schedule::recurs(5),
    /// );
    ///
    /// assert_eq!(Runtime::default().run_blocking(program), Exit::Success(2));
    /// ```
    pub fn retry<F, Out>(factory: F, schedule: Schedule<E, Out>) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
        Out: 'static,
    {
        retry_from(Arc::new(factory), schedule.initial().clone(), 0)
    }

    /// Runs the effect built by `factory`, running a new one after each
    /// success for as long as `schedule` continues, and returns the
    /// schedule's last output.
    ///
    /// The first failure ends the loop.
    pub fn repeat<F, Out>(factory: F, schedule: Schedule<A, Out>) -> Effect<R, E, Out>
    where
        F: Fn() -> Self + Send + Sync + 'static,
        Out: Send + 'static,
    {
        repeat_from(Arc::new(factory), schedule.initial().clone(), 0)
    }

    /// Runs the effect built by `factory` again and again until one fails.
    pub fn forever<F>(factory: F) -> Effect<R, E, super::Never>
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        forever_from(Arc::new(factory))
    }
}

fn pause<R: 'static, E: Send + 'static>(delay: Duration) -> Effect<R, E, ()> {
    if delay.is_zero() {
        Effect::unit()
    } else {
        Effect::sleep(delay)
    }
}

fn retry_from<R, E, A, F, Out>(
    factory: Arc<F>,
    step: StepFunction<E, Out>,
    iteration: u64,
) -> Effect<R, E, A>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
    Out: 'static,
    F: Fn() -> Effect<R, E, A> + Send + Sync + 'static,
{
    let again = Arc::clone(&factory);
    factory().fold_cause_m(
        move |cause| match cause.into_failure_or_cause() {
            Ok(error) => match step.step(iteration, &error) {
                Decision::Continue { delay, next, .. } => pause(delay)
                    .then(Effect::suspend(move || retry_from(again, next, iteration + 1))),
                Decision::Done(_) => Effect::fail(error),
            },
            Err(cause) => Effect::halt(cause),
        },
        Effect::succeed,
    )
}

fn repeat_from<R, E, A, F, Out>(
    factory: Arc<F>,
    step: StepFunction<A, Out>,
    iteration: u64,
) -> Effect<R, E, Out>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
    Out: Send + 'static,
    F: Fn() -> Effect<R, E, A> + Send + Sync + 'static,
{
    let again = Arc::clone(&factory);
    factory().flat_map(move |value| match step.step(iteration, &value) {
        Decision::Continue { delay, next, .. } => pause(delay)
            .then(Effect::suspend(move || repeat_from(again, next, iteration + 1))),
        Decision::Done(output) => Effect::succeed(output),
    })
}

fn forever_from<R, E, A, F>(factory: Arc<F>) -> Effect<R, E, super::Never>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
    F: Fn() -> Effect<R, E, A> + Send + Sync + 'static,
{
    let again = Arc::clone(&factory);
    factory().flat_map(move |_| forever_from(again))
}
