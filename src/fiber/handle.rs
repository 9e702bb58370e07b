//! Handles to forked fibers.

use std::fmt;
use std::sync::Arc;

use super::{Exit, FiberId, FiberStatus};
use crate::effect::Effect;
use crate::effect::instruction::{Instruction, erase, unit};
use crate::runtime::fiber_context::FiberContext;
use crate::sync::Promise;

/// A handle to a running fiber that completes with an `Exit<E, A>`.
///
/// Dropping a handle does not affect the fiber. Awaiting, joining and
/// interrupting are all effects, so they compose with the rest of a program.
pub struct Fiber<E, A> {
    context: Arc<FiberContext>,
    exit: Promise<E, A>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            exit: self.exit.clone(),
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fiber")
            .field("id", &self.context.id())
            .field("status", &self.context.status())
            .finish()
    }
}

impl<E, A> Fiber<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    pub(crate) const fn new(context: Arc<FiberContext>, exit: Promise<E, A>) -> Self {
        Self { context, exit }
    }

    /// The fiber's identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.context.id()
    }

    /// The fiber's current lifecycle state.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.context.status()
    }

    /// Waits for the fiber to finish and returns its exit.
    pub fn await_exit<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, Exit<E, A>> {
        self.exit.await_exit()
    }

    /// Returns the exit if the fiber has finished.
    pub fn poll<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, Option<Exit<E, A>>> {
        self.exit.poll()
    }

    /// Waits for the fiber, merges its fiber-local values into the caller,
    /// and reproduces its outcome in the caller.
    pub fn join<R: 'static>(&self) -> Effect<R, E, A> {
        let fiber = self.clone();
        self.await_exit()
            .flat_map(move |exit| fiber.inherit_refs().then(Effect::done(exit)))
    }

    /// Merges the fiber's final fiber-local values into the caller.
    ///
    /// Does nothing while the fiber is still running.
    pub fn inherit_refs<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, ()> {
        let context = Arc::clone(&self.context);
        Effect::from_instruction(Instruction::FiberRefs(Box::new(move |refs| {
            if let Some(child) = context.final_refs() {
                refs.join(&child);
            }
            erase(())
        })))
    }

    /// Interrupts the fiber on behalf of the caller and waits for it to
    /// finish.
    ///
    /// Returns the fiber's exit, which is its natural outcome if it finished
    /// before the interruption took effect.
    pub fn interrupt<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, Exit<E, A>> {
        let fiber = self.clone();
        Effect::fiber_id().flat_map(move |fiber_id| fiber.interrupt_as(fiber_id))
    }

    /// Interrupts the fiber on behalf of `fiber_id` and waits for it to
    /// finish.
    pub fn interrupt_as<R: 'static, E2: Send + 'static>(
        &self,
        fiber_id: FiberId,
    ) -> Effect<R, E2, Exit<E, A>> {
        let context = Arc::clone(&self.context);
        Effect::effect_total(move || context.interrupt_as(fiber_id)).then(self.await_exit())
    }

    /// Interrupts the fiber without waiting for it.
    pub fn interrupt_fork<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, ()> {
        let context = Arc::clone(&self.context);
        Effect::fiber_id().flat_map(move |fiber_id| {
            Effect::effect_total(move || context.interrupt_as(fiber_id))
        })
    }

    pub(crate) fn context(&self) -> &Arc<FiberContext> {
        &self.context
    }
}

/// Waits until `context` is done, without looking at its exit.
pub(crate) fn await_done(context: Arc<FiberContext>) -> Instruction {
    Instruction::Async(Box::new(move |resume| {
        if context.add_observer(Box::new(move || resume.resume(unit()))) {
            None
        } else {
            Some(unit())
        }
    }))
}
