//! Write-once synchronization variable.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::effect::Effect;
use crate::fiber::{Cause, Defect, Exit, FiberId};

type Joiner<E, A> = Box<dyn FnOnce(Exit<E, A>) + Send>;

enum State<E, A> {
    Pending {
        joiners: Vec<(u64, Joiner<E, A>)>,
        next_joiner: u64,
    },
    Done(Exit<E, A>),
}

/// A variable that is completed at most once with an [`Exit`] and can be
/// awaited by any number of fibers.
///
/// The first completion wins. Later completions return `false` and change
/// nothing. Waiting fibers are resumed in the order they started waiting.
///
/// # Examples
///
/// ```rust
/// use fibrant::prelude::*;
///
/// let program: UIO<(bool, bool, i32)> = Promise::<Never, i32>::make().flat_map(|promise| {
///     let second = promise.clone();
///     let reader = promise.clone();
///     promise.succeed(1).flat_map(move |first| {
///         second
///             .succeed(2)
///             .flat_map(move |again| reader.await_value().map(move |value| (first, again, value)))
///     })
/// });
///
/// assert_eq!(Runtime::default().run_blocking(program), Exit::Success((true, false, 1)));
/// ```
pub struct Promise<E, A> {
    state: Arc<Mutex<State<E, A>>>,
}

impl<E, A> Clone for Promise<E, A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E, A> fmt::Debug for Promise<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = matches!(*self.state.lock(), State::Done(_));
        formatter
            .debug_struct("Promise")
            .field("done", &done)
            .finish()
    }
}

impl<E, A> Default for Promise<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, A> Promise<E, A>
where
    E: Clone + Send + 'static,
    A: Clone + Send + 'static,
{
    /// Creates a pending promise outside of any effect.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending {
                joiners: Vec::new(),
                next_joiner: 0,
            })),
        }
    }

    /// Creates a pending promise.
    pub fn make<R: 'static, E2: Send + 'static>() -> Effect<R, E2, Self> {
        Effect::effect_total(Self::new)
    }

    /// Completes the promise with `exit`, returning `true` if this call won.
    ///
    /// `observed` is set when at least one joiner was waiting.
    pub(crate) fn complete_now(&self, exit: Exit<E, A>) -> (bool, bool) {
        let joiners = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Done(_) => return (false, false),
                State::Pending { joiners, .. } => {
                    let joiners = std::mem::take(joiners);
                    *state = State::Done(exit.clone());
                    joiners
                }
            }
        };
        let observed = !joiners.is_empty();
        for (_, joiner) in joiners {
            joiner(exit.clone());
        }
        (true, observed)
    }

    /// Returns the exit if the promise is already completed.
    pub(crate) fn peek(&self) -> Option<Exit<E, A>> {
        match &*self.state.lock() {
            State::Done(exit) => Some(exit.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Waits for completion and reproduces the exit.
    ///
    /// The wait is interruptible; an interrupted waiter is removed from the
    /// joiner list.
    pub fn await_value<R: 'static>(&self) -> Effect<R, E, A> {
        self.await_exit().flat_map(Effect::done)
    }

    /// Waits for completion and returns the exit as a value.
    pub fn await_exit<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, Exit<E, A>> {
        let state = Arc::clone(&self.state);
        Effect::suspend(move || {
            let registered: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
            let slot = Arc::clone(&registered);
            let registration = Arc::clone(&state);
            Effect::effect_async_maybe(move |callback| {
                let mut guard = registration.lock();
                match &mut *guard {
                    State::Done(exit) => Some(Effect::succeed(exit.clone())),
                    State::Pending {
                        joiners,
                        next_joiner,
                    } => {
                        let id = *next_joiner;
                        *next_joiner += 1;
                        *slot.lock() = Some(id);
                        joiners.push((id, Box::new(move |exit| callback.succeed(exit))));
                        None
                    }
                }
            })
            .on_interrupt(Effect::effect_total(move || {
                if let Some(id) = registered.lock().take()
                    && let State::Pending { joiners, .. } = &mut *state.lock()
                {
                    joiners.retain(|(joiner, _)| *joiner != id);
                }
            }))
        })
    }

    /// Returns the exit without waiting, if the promise is completed.
    pub fn poll<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, Option<Exit<E, A>>> {
        let promise = self.clone();
        Effect::effect_total(move || promise.peek())
    }

    /// Returns `true` if the promise is completed.
    pub fn is_done<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, bool> {
        let promise = self.clone();
        Effect::effect_total(move || promise.peek().is_some())
    }

    /// Completes the promise with `exit`.
    pub fn done<R: 'static, E2: Send + 'static>(&self, exit: Exit<E, A>) -> Effect<R, E2, bool> {
        let promise = self.clone();
        Effect::effect_total(move || promise.complete_now(exit).0)
    }

    /// Completes the promise with a value.
    pub fn succeed<R: 'static, E2: Send + 'static>(&self, value: A) -> Effect<R, E2, bool> {
        self.done(Exit::Success(value))
    }

    /// Completes the promise with a typed failure.
    pub fn fail<R: 'static, E2: Send + 'static>(&self, error: E) -> Effect<R, E2, bool> {
        self.done(Exit::fail(error))
    }

    /// Completes the promise with a failure cause.
    pub fn halt<R: 'static, E2: Send + 'static>(&self, cause: Cause<E>) -> Effect<R, E2, bool> {
        self.done(Exit::halt(cause))
    }

    /// Completes the promise with a defect.
    pub fn die<R: 'static, E2: Send + 'static>(&self, defect: Defect) -> Effect<R, E2, bool> {
        self.halt(Cause::Die(defect))
    }

    /// Completes the promise with an interruption by the current fiber.
    pub fn interrupt<R: 'static, E2: Send + 'static>(&self) -> Effect<R, E2, bool> {
        let promise = self.clone();
        Effect::fiber_id().flat_map(move |fiber_id| promise.interrupt_as(fiber_id))
    }

    /// Completes the promise with an interruption by `fiber_id`.
    pub fn interrupt_as<R: 'static, E2: Send + 'static>(
        &self,
        fiber_id: FiberId,
    ) -> Effect<R, E2, bool> {
        self.halt(Cause::Interrupt(fiber_id))
    }

    /// Completes the promise with the outcome of `effect`.
    pub fn complete<R: 'static>(&self, effect: Effect<R, E, A>) -> Effect<R, E, bool> {
        let promise = self.clone();
        effect.exit().flat_map(move |exit| promise.done(exit))
    }
}
