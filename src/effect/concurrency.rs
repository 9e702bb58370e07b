//! Forking, racing, parallel composition and time.
//!
//! Combinators that start fibers need `Clone` errors and values because a
//! fiber's exit is stored once and handed to every party that awaits it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::instruction::{Instruction, erase, unerase_exit};
use super::{Effect, Never};
use crate::fiber::handle::await_done;
use crate::fiber::{Cause, Exit, Fiber, FiberStatus};
use crate::runtime::fiber_context::FiberContext;
use crate::sync::Promise;

#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Keeps `cause`, adding the sibling's failure unless the sibling was merely
/// interrupted.
fn with_sibling<E, X>(cause: Cause<E>, sibling: Exit<E, X>) -> Cause<E> {
    match sibling {
        Exit::Failure(other) if !other.interrupted_only() => cause.both(other),
        _ => cause,
    }
}

impl<R, E, A> Effect<R, E, A>
where
    R: 'static,
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    /// Starts `self` on a child fiber supervised by the current one.
    ///
    /// If the current fiber is interrupted, the child is interrupted too and
    /// awaited before the current fiber completes.
    pub fn fork<E2: Send + 'static>(self) -> Effect<R, E2, Fiber<E, A>> {
        self.fork_with(false)
    }

    /// Starts `self` on a fiber that is not supervised by anyone.
    pub fn fork_daemon<E2: Send + 'static>(self) -> Effect<R, E2, Fiber<E, A>> {
        self.fork_with(true)
    }

    fn fork_with<E2: Send + 'static>(self, daemon: bool) -> Effect<R, E2, Fiber<E, A>> {
        let promise: Promise<E, A> = Promise::new();
        let completion = promise.clone();
        Effect::from_instruction(Instruction::Fork {
            effect: Box::new(self.into_instruction()),
            daemon,
            on_exit: Box::new(move |exit| completion.complete_now(unerase_exit(exit)).1),
            attach: Box::new(move |context: &Arc<FiberContext>| {
                erase(Fiber::new(Arc::clone(context), promise))
            }),
        })
    }

    /// Runs `self` and `that` concurrently and hands the first exit, along
    /// with the other fiber, to the matching handler.
    ///
    /// If the caller is interrupted while waiting, both fibers are
    /// interrupted.
    pub fn race_with<E1, B, E2, C, L, T>(
        self,
        that: Effect<R, E1, B>,
        left_done: L,
        right_done: T,
    ) -> Effect<R, E2, C>
    where
        E1: Clone + Send + 'static,
        B: Clone + Send + 'static,
        E2: Send + 'static,
        C: Send + 'static,
        L: FnOnce(Exit<E, A>, Fiber<E1, B>) -> Effect<R, E2, C> + Send + 'static,
        T: FnOnce(Exit<E1, B>, Fiber<E, A>) -> Effect<R, E2, C> + Send + 'static,
    {
        self.fork::<E2>()
            .zip(that.fork::<E2>())
            .flat_map(move |(left, right)| {
                let (watched_left, watched_right) = (left.clone(), right.clone());
                let (stop_left, stop_right) = (left.clone(), right.clone());
                first_done(watched_left, watched_right)
                    .on_interrupt(
                        stop_left
                            .interrupt::<R, Never>()
                            .then(stop_right.interrupt())
                            .unit_value(),
                    )
                    .flat_map(move |side| match side {
                        Side::Left => left
                            .await_exit()
                            .flat_map(move |exit| left_done(exit, right)),
                        Side::Right => right
                            .await_exit()
                            .flat_map(move |exit| right_done(exit, left)),
                    })
            })
    }

    /// Returns the first success of `self` and `that`, interrupting the
    /// loser. Fails only if both fail, with both causes combined.
    pub fn race(self, that: Self) -> Self {
        self.race_with(
            that,
            |exit, loser| match exit {
                Exit::Success(value) => loser.interrupt().as_value(value),
                Exit::Failure(cause) => loser.join().map_cause(move |other| cause.both(other)),
            },
            |exit, loser| match exit {
                Exit::Success(value) => loser.interrupt().as_value(value),
                Exit::Failure(cause) => loser.join().map_cause(move |other| cause.both(other)),
            },
        )
    }

    /// Returns `None` if `self` does not finish within `duration`, in which
    /// case it is interrupted.
    pub fn timeout(self, duration: Duration) -> Effect<R, E, Option<A>> {
        self.map(Some).race_with(
            Effect::<R, E, ()>::sleep(duration).map(|()| None::<A>),
            |exit, timer| timer.interrupt().then(Effect::done(exit)),
            |exit, effect| effect.interrupt().then(Effect::done(exit)),
        )
    }

    /// Runs `self` and `that` concurrently and keeps both values.
    ///
    /// If either fails, the other is interrupted and the causes are combined
    /// with [`Cause::both`].
    pub fn zip_par<B>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)>
    where
        B: Clone + Send + 'static,
    {
        self.race_with(
            that,
            |left, right_fiber| match left {
                Exit::Success(value) => right_fiber.join().map(move |right| (value, right)),
                Exit::Failure(cause) => right_fiber
                    .interrupt()
                    .flat_map(move |right| Effect::halt(with_sibling(cause, right))),
            },
            |right, left_fiber| match right {
                Exit::Success(value) => left_fiber.join().map(move |left| (left, value)),
                Exit::Failure(cause) => left_fiber
                    .interrupt()
                    .flat_map(move |left| Effect::halt(with_sibling(cause, left))),
            },
        )
    }

    /// Runs `self` and `that` concurrently and combines both values.
    pub fn zip_with_par<B, C, F>(self, that: Effect<R, E, B>, function: F) -> Effect<R, E, C>
    where
        B: Clone + Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.zip_par(that)
            .map(move |(left, right)| function(left, right))
    }

    /// Runs every effect concurrently and collects the values in order.
    pub fn collect_all_par<I>(effects: I) -> Effect<R, E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        effects
            .into_iter()
            .fold(Effect::succeed(Vec::new()), |collected, effect| {
                collected.zip_with_par(effect, |mut values, value| {
                    values.push(value);
                    values
                })
            })
    }

    /// Applies `function` to every item and runs the effects concurrently.
    pub fn foreach_par<I, F>(items: I, function: F) -> Effect<R, E, Vec<A>>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Self,
    {
        Self::collect_all_par(items.into_iter().map(function))
    }
}

/// Suspends until one of the two fibers is done and reports which.
fn first_done<R, X, E, A, E1, B>(left: Fiber<E, A>, right: Fiber<E1, B>) -> Effect<R, X, Side>
where
    R: 'static,
    X: Send + 'static,
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
    E1: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    Effect::effect_async_maybe(move |callback| {
        let callback = Arc::new(Mutex::new(Some(callback)));
        for (context, side) in [
            (Arc::clone(left.context()), Side::Left),
            (Arc::clone(right.context()), Side::Right),
        ] {
            let pending = Arc::clone(&callback);
            let registered = context.add_observer(Box::new(move || {
                if let Some(callback) = pending.lock().take() {
                    callback.succeed(side);
                }
            }));
            if !registered {
                return Some(Effect::succeed(side));
            }
        }
        None
    })
}

// =============================================================================
// Time
// =============================================================================

impl<R: 'static, E: Send + 'static> Effect<R, E, ()> {
    /// Suspends the fiber for `duration`.
    ///
    /// The wait is interruptible; interrupting it cancels the timer.
    pub fn sleep(duration: Duration) -> Self {
        Self::descriptor_with(move |descriptor| {
            let executor = descriptor.executor();
            Self::effect_async_interrupt(move |callback| {
                let timer =
                    executor.submit_after(duration, Box::new(move || callback.succeed(())));
                Effect::effect_total(move || timer.cancel())
            })
        })
    }
}

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// Runs `self` after waiting for `duration`.
    pub fn delay(self, duration: Duration) -> Self {
        Effect::<R, E, ()>::sleep(duration).then(self)
    }
}

// =============================================================================
// Scope
// =============================================================================

#[derive(Default)]
struct ScopeState {
    closed: bool,
    fibers: Vec<Arc<FiberContext>>,
}

/// A region whose forked fibers are interrupted and awaited when it ends.
///
/// Created by [`Effect::scoped`].
#[derive(Clone, Default)]
pub struct Scope {
    state: Arc<Mutex<ScopeState>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("Scope")
            .field("closed", &state.closed)
            .field("fibers", &state.fibers.len())
            .finish()
    }
}

impl Scope {
    /// Starts `effect` on a fiber owned by this scope.
    ///
    /// Forking into a scope that has already ended interrupts the new fiber
    /// immediately. Fibers that already finished are forgotten here, so a
    /// long-lived scope only holds the ones still running.
    pub fn fork<R, E, A, E2>(&self, effect: Effect<R, E, A>) -> Effect<R, E2, Fiber<E, A>>
    where
        R: 'static,
        E: Clone + Send + 'static,
        A: Clone + Send + 'static,
        E2: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        effect.fork_daemon().flat_map(move |fiber: Fiber<E, A>| {
            let closed = {
                let mut state = state.lock();
                if !state.closed {
                    state
                        .fibers
                        .retain(|fiber| fiber.status() != FiberStatus::Done);
                    state.fibers.push(Arc::clone(fiber.context()));
                }
                state.closed
            };
            if closed {
                fiber.interrupt_fork().as_value(fiber)
            } else {
                Effect::succeed(fiber)
            }
        })
    }

    /// Interrupts every fiber of the scope and waits for all of them.
    fn close<R: 'static>(&self) -> Effect<R, Never, ()> {
        let state = Arc::clone(&self.state);
        Effect::fiber_id().flat_map(move |closer| {
            let fibers = {
                let mut state = state.lock();
                state.closed = true;
                std::mem::take(&mut state.fibers)
            };
            let interrupted = fibers.clone();
            Effect::effect_total(move || {
                for fiber in &interrupted {
                    fiber.interrupt_as(closer);
                }
            })
            .then(fibers.into_iter().fold(Effect::unit(), |awaited, fiber| {
                awaited.then(Effect::from_instruction(await_done(fiber)))
            }))
        })
    }
}

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// Runs the effect built by `function` with a fresh [`Scope`], and
    /// interrupts and awaits the scope's fibers when it ends.
    pub fn scoped<F>(function: F) -> Self
    where
        F: FnOnce(Scope) -> Self + Send + 'static,
    {
        Self::bracket(
            Effect::effect_total(Scope::default),
            function,
            |scope: Scope| scope.close(),
        )
    }
}
