//! Retry and repeat policies.
//!
//! A [`Schedule<In, Out>`] decides, after each run of an effect, whether to
//! run it again and how long to wait first. It sees the run's outcome as its
//! input (the error for [`Effect::retry`](crate::effect::Effect::retry), the
//! value for [`Effect::repeat`](crate::effect::Effect::repeat)) and produces
//! an output of its own.
//!
//! Schedules are pure: stepping the same step function with the same
//! iteration and input always yields the same [`Decision`]. Combinators build
//! new step functions that close over the ones they combine.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use fibrant::schedule::{Decision, Schedule};
//!
//! let schedule: Schedule<(), Duration> =
//!     Schedule::exponential(Duration::from_millis(10), 2.0).up_to(3);
//!
//! let mut delays = Vec::new();
//! let mut step = schedule.initial().clone();
//! for iteration in 0.. {
//!     match step.step(iteration, &()) {
//!         Decision::Continue { delay, next, .. } => {
//!             delays.push(delay);
//!             step = next;
//!         }
//!         Decision::Done(_) => break,
//!     }
//! }
//!
//! assert_eq!(
//!     delays,
//!     [10, 20, 40].map(Duration::from_millis).to_vec()
//! );
//! ```

mod decision;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use decision::{Decision, StepFunction};

/// A policy for running an effect again.
pub struct Schedule<In, Out> {
    initial: StepFunction<In, Out>,
}

impl<In, Out> Clone for Schedule<In, Out> {
    fn clone(&self) -> Self {
        Self {
            initial: self.initial.clone(),
        }
    }
}

impl<In, Out> fmt::Debug for Schedule<In, Out> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Schedule").finish_non_exhaustive()
    }
}

impl<In, Out> Schedule<In, Out> {
    /// A schedule starting with `initial`.
    pub const fn new(initial: StepFunction<In, Out>) -> Self {
        Self { initial }
    }

    /// The step function for the first decision.
    pub const fn initial(&self) -> &StepFunction<In, Out> {
        &self.initial
    }

    /// Takes the first step.
    #[must_use]
    pub fn step(&self, iteration: u64, input: &In) -> Decision<In, Out> {
        self.initial.step(iteration, input)
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl<In: 'static> Schedule<In, u64> {
    /// Recurs forever without delay, counting recurrences from zero.
    pub fn forever() -> Self {
        Self::new(counting(0, Duration::ZERO, None))
    }

    /// Recurs `times` times without delay.
    pub fn recurs(times: u64) -> Self {
        Self::new(counting(0, Duration::ZERO, Some(times)))
    }

    /// Recurs forever, waiting `interval` between runs.
    pub fn spaced(interval: Duration) -> Self {
        Self::new(counting(0, interval, None))
    }
}

impl<In: 'static> Schedule<In, ()> {
    /// Recurs once.
    pub fn once() -> Self {
        Schedule::recurs(1).unit()
    }

    /// Never recurs.
    pub fn stop() -> Self {
        Schedule::recurs(0).unit()
    }
}

impl<In: 'static> Schedule<In, Duration> {
    /// Recurs forever with delays `base * factor^n`, outputting each delay.
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Self::new(by_iteration(
            0,
            Arc::new(move |recurrence: u64| {
                let exponent = i32::try_from(recurrence).unwrap_or(i32::MAX);
                scale(base, factor.powi(exponent))
            }),
        ))
    }

    /// Recurs forever with delays `base * (n + 1)`, outputting each delay.
    pub fn linear(base: Duration) -> Self {
        Self::new(by_iteration(
            0,
            Arc::new(move |recurrence: u64| {
                base.saturating_mul(u32::try_from(recurrence + 1).unwrap_or(u32::MAX))
            }),
        ))
    }

    /// Recurs forever with delays following the Fibonacci sequence scaled by
    /// `one`, outputting each delay.
    pub fn fibonacci(one: Duration) -> Self {
        Self::new(fibonacci_from(one, one))
    }
}

impl<A: Clone + Send + Sync + 'static> Schedule<A, A> {
    /// Recurs forever without delay, outputting its input.
    pub fn identity() -> Self {
        Self::from_fn(|_, input: &A| (input.clone(), Some(Duration::ZERO)))
    }

    /// Recurs without delay while `predicate` holds for the input.
    pub fn recur_while<P>(predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self::from_fn(move |_, input: &A| {
            (input.clone(), predicate(input).then_some(Duration::ZERO))
        })
    }

    /// Recurs without delay until `predicate` holds for the input.
    pub fn recur_until<P>(predicate: P) -> Self
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self::recur_while(move |input| !predicate(input))
    }
}

impl<In: 'static, Out: 'static> Schedule<In, Out> {
    /// A schedule that does not carry state between steps.
    ///
    /// `function` returns the output and the delay before the next run, or
    /// `None` to stop.
    pub fn from_fn<F>(function: F) -> Self
    where
        F: Fn(u64, &In) -> (Out, Option<Duration>) + Send + Sync + 'static,
    {
        Self::new(stateless(Arc::new(function)))
    }
}

// =============================================================================
// Combinators
// =============================================================================

impl<In: 'static, Out: Send + Sync + 'static> Schedule<In, Out> {
    /// Transforms every output.
    pub fn map<Out2, F>(self, function: F) -> Schedule<In, Out2>
    where
        Out2: Send + Sync + 'static,
        F: Fn(Out) -> Out2 + Send + Sync + 'static,
    {
        Schedule::new(map_step(self.initial, Arc::new(function)))
    }

    /// Discards the outputs.
    pub fn unit(self) -> Schedule<In, ()> {
        self.map(|_| ())
    }

    /// Adapts the schedule to a different input.
    pub fn contramap<In2, F>(self, function: F) -> Schedule<In2, Out>
    where
        In2: 'static,
        F: Fn(&In2) -> In + Send + Sync + 'static,
    {
        Schedule::new(contramap_step(self.initial, Arc::new(function)))
    }

    /// Replaces every delay with `function(output, delay)`.
    pub fn modify_delay<F>(self, function: F) -> Self
    where
        F: Fn(&Out, Duration) -> Duration + Send + Sync + 'static,
    {
        Self::new(modify_delay_step(self.initial, Arc::new(function)))
    }

    /// Adds `function(output)` to every delay.
    pub fn add_delay<F>(self, function: F) -> Self
    where
        F: Fn(&Out) -> Duration + Send + Sync + 'static,
    {
        self.modify_delay(move |output, delay| delay.saturating_add(function(output)))
    }

    /// Continues while both schedules continue, waiting for the longer of
    /// the two delays.
    pub fn both<Out2>(self, that: Schedule<In, Out2>) -> Schedule<In, (Out, Out2)>
    where
        Out2: Send + Sync + 'static,
    {
        Schedule::new(both_step(self.initial, that.initial))
    }

    /// Same as [`Schedule::both`].
    pub fn and<Out2>(self, that: Schedule<In, Out2>) -> Schedule<In, (Out, Out2)>
    where
        Out2: Send + Sync + 'static,
    {
        self.both(that)
    }

    /// Runs `self` until it is done, then `that`.
    pub fn and_then(self, that: Self) -> Self {
        Self::new(and_then_step(self.initial, that.initial))
    }

    /// Limits the schedule to `times` recurrences.
    pub fn up_to(self, times: u64) -> Self {
        self.both(Schedule::recurs(times)).map(|(output, _)| output)
    }

    /// Folds the outputs into a running summary.
    pub fn fold<Z, F>(self, initial: Z, function: F) -> Schedule<In, Z>
    where
        Z: Clone + Send + Sync + 'static,
        F: Fn(Z, &Out) -> Z + Send + Sync + 'static,
    {
        Schedule::new(fold_step(self.initial, initial, Arc::new(function)))
    }
}

impl<In: 'static, Out: Clone + Send + Sync + 'static> Schedule<In, Out> {
    /// Continues while either schedule continues, waiting for the shorter
    /// delay of those still continuing.
    pub fn either<Out2>(self, that: Schedule<In, Out2>) -> Schedule<In, (Out, Out2)>
    where
        Out2: Clone + Send + Sync + 'static,
    {
        Schedule::new(either_step(self.initial, that.initial))
    }

    /// Same as [`Schedule::either`].
    pub fn or<Out2>(self, that: Schedule<In, Out2>) -> Schedule<In, (Out, Out2)>
    where
        Out2: Clone + Send + Sync + 'static,
    {
        self.either(that)
    }

    /// Collects every output so far.
    pub fn collect_all(self) -> Schedule<In, Vec<Out>> {
        self.fold(Vec::new(), |mut outputs, output| {
            outputs.push(output.clone());
            outputs
        })
    }
}

// =============================================================================
// Step functions
// =============================================================================

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn scale(base: Duration, factor: f64) -> Duration {
    let nanos = (base.as_nanos() as f64 * factor).round();
    if nanos >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

fn counting<In: 'static>(count: u64, delay: Duration, limit: Option<u64>) -> StepFunction<In, u64> {
    StepFunction::new(move |_, _| {
        if limit.is_some_and(|limit| count >= limit) {
            Decision::Done(count)
        } else {
            Decision::continue_with(count, delay, counting(count + 1, delay, limit))
        }
    })
}

fn by_iteration<In: 'static>(
    recurrence: u64,
    delay_for: Arc<dyn Fn(u64) -> Duration + Send + Sync>,
) -> StepFunction<In, Duration> {
    StepFunction::new(move |_, _| {
        let delay = delay_for(recurrence);
        Decision::continue_with(
            delay,
            delay,
            by_iteration(recurrence + 1, Arc::clone(&delay_for)),
        )
    })
}

fn fibonacci_from<In: 'static>(current: Duration, following: Duration) -> StepFunction<In, Duration> {
    StepFunction::new(move |_, _| {
        Decision::continue_with(
            current,
            current,
            fibonacci_from(following, current.saturating_add(following)),
        )
    })
}

fn stateless<In, Out, F>(function: Arc<F>) -> StepFunction<In, Out>
where
    In: 'static,
    Out: 'static,
    F: Fn(u64, &In) -> (Out, Option<Duration>) + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| match function(iteration, input) {
        (output, Some(delay)) => {
            Decision::continue_with(output, delay, stateless(Arc::clone(&function)))
        }
        (output, None) => Decision::Done(output),
    })
}

fn map_step<In, Out, Out2, F>(step: StepFunction<In, Out>, function: Arc<F>) -> StepFunction<In, Out2>
where
    In: 'static,
    Out: 'static,
    Out2: 'static,
    F: Fn(Out) -> Out2 + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| match step.step(iteration, input) {
        Decision::Continue {
            output,
            delay,
            next,
        } => Decision::continue_with(function(output), delay, map_step(next, Arc::clone(&function))),
        Decision::Done(output) => Decision::Done(function(output)),
    })
}

fn contramap_step<In, In2, Out, F>(step: StepFunction<In, Out>, function: Arc<F>) -> StepFunction<In2, Out>
where
    In: 'static,
    In2: 'static,
    Out: 'static,
    F: Fn(&In2) -> In + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| {
        match step.step(iteration, &function(input)) {
            Decision::Continue {
                output,
                delay,
                next,
            } => Decision::continue_with(output, delay, contramap_step(next, Arc::clone(&function))),
            Decision::Done(output) => Decision::Done(output),
        }
    })
}

fn modify_delay_step<In, Out, F>(step: StepFunction<In, Out>, function: Arc<F>) -> StepFunction<In, Out>
where
    In: 'static,
    Out: 'static,
    F: Fn(&Out, Duration) -> Duration + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| match step.step(iteration, input) {
        Decision::Continue {
            output,
            delay,
            next,
        } => {
            let delay = function(&output, delay);
            Decision::continue_with(output, delay, modify_delay_step(next, Arc::clone(&function)))
        }
        done @ Decision::Done(_) => done,
    })
}

fn both_step<In, Out, Out2>(
    left: StepFunction<In, Out>,
    right: StepFunction<In, Out2>,
) -> StepFunction<In, (Out, Out2)>
where
    In: 'static,
    Out: 'static,
    Out2: 'static,
{
    StepFunction::new(move |iteration, input| {
        match (left.step(iteration, input), right.step(iteration, input)) {
            (
                Decision::Continue {
                    output: left_output,
                    delay: left_delay,
                    next: left_next,
                },
                Decision::Continue {
                    output: right_output,
                    delay: right_delay,
                    next: right_next,
                },
            ) => Decision::continue_with(
                (left_output, right_output),
                left_delay.max(right_delay),
                both_step(left_next, right_next),
            ),
            (left, right) => Decision::Done((left.into_output(), right.into_output())),
        }
    })
}

fn either_step<In, Out, Out2>(
    left: StepFunction<In, Out>,
    right: StepFunction<In, Out2>,
) -> StepFunction<In, (Out, Out2)>
where
    In: 'static,
    Out: Clone + Send + Sync + 'static,
    Out2: Clone + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| {
        match (left.step(iteration, input), right.step(iteration, input)) {
            (
                Decision::Continue {
                    output: left_output,
                    delay: left_delay,
                    next: left_next,
                },
                Decision::Continue {
                    output: right_output,
                    delay: right_delay,
                    next: right_next,
                },
            ) => Decision::continue_with(
                (left_output, right_output),
                left_delay.min(right_delay),
                either_step(left_next, right_next),
            ),
            (
                Decision::Continue {
                    output: left_output,
                    delay,
                    next,
                },
                Decision::Done(right_output),
            ) => Decision::continue_with(
                (left_output, right_output.clone()),
                delay,
                either_step(next, StepFunction::done(right_output)),
            ),
            (
                Decision::Done(left_output),
                Decision::Continue {
                    output: right_output,
                    delay,
                    next,
                },
            ) => Decision::continue_with(
                (left_output.clone(), right_output),
                delay,
                either_step(StepFunction::done(left_output), next),
            ),
            (Decision::Done(left_output), Decision::Done(right_output)) => {
                Decision::Done((left_output, right_output))
            }
        }
    })
}

fn and_then_step<In, Out>(first: StepFunction<In, Out>, second: StepFunction<In, Out>) -> StepFunction<In, Out>
where
    In: 'static,
    Out: 'static,
{
    StepFunction::new(move |iteration, input| match first.step(iteration, input) {
        Decision::Continue {
            output,
            delay,
            next,
        } => Decision::continue_with(output, delay, and_then_step(next, second.clone())),
        Decision::Done(_) => second.step(iteration, input),
    })
}

fn fold_step<In, Out, Z, F>(step: StepFunction<In, Out>, summary: Z, function: Arc<F>) -> StepFunction<In, Z>
where
    In: 'static,
    Out: 'static,
    Z: Clone + Send + Sync + 'static,
    F: Fn(Z, &Out) -> Z + Send + Sync + 'static,
{
    StepFunction::new(move |iteration, input| match step.step(iteration, input) {
        Decision::Continue {
            output,
            delay,
            next,
        } => {
            let summary = function(summary.clone(), &output);
            Decision::continue_with(
                summary.clone(),
                delay,
                fold_step(next, summary, Arc::clone(&function)),
            )
        }
        Decision::Done(output) => Decision::Done(function(summary.clone(), &output)),
    })
}
