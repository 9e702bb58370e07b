//! Step functions and their decisions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Step<In, Out> = dyn Fn(u64, &In) -> Decision<In, Out> + Send + Sync;

/// One step of a schedule: given the iteration number and the latest input,
/// decide whether to continue.
///
/// Step functions are immutable. The state a schedule carries from one
/// iteration to the next lives in the `next` step function of a
/// [`Decision::Continue`].
pub struct StepFunction<In, Out> {
    step: Arc<Step<In, Out>>,
}

impl<In, Out> Clone for StepFunction<In, Out> {
    fn clone(&self) -> Self {
        Self {
            step: Arc::clone(&self.step),
        }
    }
}

impl<In, Out> fmt::Debug for StepFunction<In, Out> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("StepFunction(..)")
    }
}

impl<In, Out> StepFunction<In, Out> {
    /// Wraps a step closure.
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(u64, &In) -> Decision<In, Out> + Send + Sync + 'static,
    {
        Self {
            step: Arc::new(step),
        }
    }

    /// Decides what happens after iteration `iteration` produced `input`.
    #[must_use]
    pub fn step(&self, iteration: u64, input: &In) -> Decision<In, Out> {
        (self.step)(iteration, input)
    }
}

impl<In: 'static, Out: Clone + Send + Sync + 'static> StepFunction<In, Out> {
    /// A step function that is done with `output` whatever its input.
    pub fn done(output: Out) -> Self {
        Self::new(move |_, _| Decision::Done(output.clone()))
    }
}

/// What a schedule decided after one step.
pub enum Decision<In, Out> {
    /// Run again after `delay`, continuing with `next`.
    Continue {
        /// The schedule's output for this step.
        output: Out,
        /// How long to wait before the next run.
        delay: Duration,
        /// The step function for the next iteration.
        next: StepFunction<In, Out>,
    },
    /// Stop.
    Done(Out),
}

impl<In, Out> Decision<In, Out> {
    /// Continue after `delay`, with `next`.
    pub const fn continue_with(output: Out, delay: Duration, next: StepFunction<In, Out>) -> Self {
        Self::Continue {
            output,
            delay,
            next,
        }
    }

    /// The output of this step.
    pub const fn output(&self) -> &Out {
        match self {
            Self::Continue { output, .. } | Self::Done(output) => output,
        }
    }

    /// Consumes the decision, returning its output.
    pub fn into_output(self) -> Out {
        match self {
            Self::Continue { output, .. } | Self::Done(output) => output,
        }
    }

    /// The delay before the next run, or `None` when done.
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::Continue { delay, .. } => Some(*delay),
            Self::Done(_) => None,
        }
    }

    /// Returns `true` for [`Decision::Continue`].
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue { .. })
    }
}

impl<In, Out: fmt::Debug> fmt::Debug for Decision<In, Out> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue { output, delay, .. } => formatter
                .debug_struct("Continue")
                .field("output", output)
                .field("delay", delay)
                .finish_non_exhaustive(),
            Self::Done(output) => formatter.debug_tuple("Done").field(output).finish(),
        }
    }
}

/// Decisions compare by output and delay; the continuations are not compared.
impl<In, Out: PartialEq> PartialEq for Decision<In, Out> {
    fn eq(&self, other: &Self) -> bool {
        self.output() == other.output() && self.delay() == other.delay()
    }
}
