//! Mutable reference with effectful, serialized updates.

use std::fmt;

use super::{Ref, Semaphore};
use crate::effect::Effect;

/// A mutable cell whose updates may themselves be effects.
///
/// Updates hold a single permit for their whole run, so two updates never
/// interleave even when they suspend halfway. Waiting updates proceed in the
/// order they arrived.
///
/// # Examples
///
/// ```rust
/// use fibrant::prelude::*;
///
/// let program: IO<String, i32> = RefM::make(1).flat_map(|cell: RefM<i32>| {
///     let reader = cell.clone();
///     cell.update_m(|value| Effect::succeed(value * 10))
///         .then(reader.get())
/// });
///
/// assert_eq!(Runtime::default().run_blocking(program), Exit::Success(10));
/// ```
pub struct RefM<A> {
    value: Ref<A>,
    lock: Semaphore,
}

impl<A> Clone for RefM<A> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for RefM<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("RefM").field(&self.value).finish()
    }
}

impl<A: Clone + Send + Sync + 'static> RefM<A> {
    /// Creates a reference outside of any effect.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self {
            value: Ref::new(initial),
            lock: Semaphore::new(1),
        }
    }

    /// Creates a reference holding `initial`.
    pub fn make<R: 'static, E: Send + 'static>(initial: A) -> Effect<R, E, Self> {
        Effect::effect_total(move || Self::new(initial))
    }

    /// Reads the current value without waiting for running updates.
    pub fn get<R: 'static, E: Send + 'static>(&self) -> Effect<R, E, A> {
        self.value.get()
    }

    /// Replaces the value once running updates have finished.
    pub fn set<R: 'static, E: Send + 'static>(&self, value: A) -> Effect<R, E, ()> {
        self.lock.with_permit(self.value.set(value))
    }

    /// Runs `function` on the current value and stores the value it produces
    /// along with returning its result.
    ///
    /// If `function`'s effect fails, the value is left unchanged.
    pub fn modify_m<R, E, B, F>(&self, function: F) -> Effect<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, (B, A)> + Send + 'static,
    {
        let value = self.value.clone();
        let writer = self.value.clone();
        self.lock.with_permit(
            value
                .get()
                .flat_map(function)
                .flat_map(move |(result, next)| writer.set(next).as_value(result)),
        )
    }

    /// Replaces the value with the one produced by `function`'s effect.
    pub fn update_m<R, E, F>(&self, function: F) -> Effect<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, A> + Send + 'static,
    {
        self.modify_m(move |current| function(current).map(|next| ((), next)))
    }

    /// Like [`RefM::update_m`], returning the new value.
    pub fn update_and_get_m<R, E, F>(&self, function: F) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        F: FnOnce(A) -> Effect<R, E, A> + Send + 'static,
    {
        self.modify_m(move |current| function(current).map(|next| (next.clone(), next)))
    }

    /// Replaces the value with `function` applied to it.
    pub fn update<R, E, F>(&self, function: F) -> Effect<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.update_m(move |current| Effect::succeed(function(current)))
    }
}
