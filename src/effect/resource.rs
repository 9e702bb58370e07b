//! Finalizers and resource safety.
//!
//! Every combinator here runs its finalizer uninterruptibly, and a failing
//! finalizer is sequenced after the original cause with [`Cause::then`]
//! rather than replacing it.

use tracing::warn;

use super::{Effect, Never, widen_cause};
use crate::fiber::{Cause, Defect, Exit};

/// Completes with `exit` once a finalizer produced `finalized`.
fn after_finalizer<R, E, A>(exit: Exit<E, A>, finalized: Exit<Never, ()>) -> Effect<R, E, A>
where
    R: 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    if let Exit::Failure(cause) = &finalized {
        let defects: Vec<&str> = cause.defects().into_iter().map(Defect::message).collect();
        warn!(?defects, interrupted = cause.interrupted(), "finalizer failed");
    }
    match (exit, finalized) {
        (exit, Exit::Success(())) => Effect::done(exit),
        (Exit::Success(_), Exit::Failure(cause)) => Effect::halt(widen_cause(cause)),
        (Exit::Failure(cause), Exit::Failure(finalizer_cause)) => {
            Effect::halt(cause.then(widen_cause(finalizer_cause)))
        }
    }
}

impl<R: 'static, E: Send + 'static, A: Send + 'static> Effect<R, E, A> {
    /// Runs `finalizer` after `self`, whatever its outcome.
    pub fn ensuring(self, finalizer: Effect<R, Never, ()>) -> Self {
        Self::uninterruptible_mask(move |restore| {
            restore.apply(self).exit().flat_map(move |exit| {
                finalizer
                    .exit()
                    .flat_map(move |finalized| after_finalizer(exit, finalized))
            })
        })
    }

    /// Runs the finalizer built from `self`'s exit, whatever the outcome.
    pub fn on_exit<F>(self, cleanup: F) -> Self
    where
        F: FnOnce(&Exit<E, A>) -> Effect<R, Never, ()> + Send + 'static,
    {
        Self::uninterruptible_mask(move |restore| {
            restore.apply(self).exit().flat_map(move |exit| {
                cleanup(&exit)
                    .exit()
                    .flat_map(move |finalized| after_finalizer(exit, finalized))
            })
        })
    }

    /// Runs `cleanup` only if `self` is interrupted.
    pub fn on_interrupt(self, cleanup: Effect<R, Never, ()>) -> Self {
        self.on_exit(move |exit| {
            if exit.is_interrupted() {
                cleanup
            } else {
                Effect::unit()
            }
        })
    }

    /// Runs `cleanup` with the failure cause if `self` fails, dies or is
    /// interrupted.
    pub fn on_error<F>(self, cleanup: F) -> Self
    where
        F: FnOnce(&Cause<E>) -> Effect<R, Never, ()> + Send + 'static,
    {
        self.on_exit(move |exit| match exit {
            Exit::Success(_) => Effect::unit(),
            Exit::Failure(cause) => cleanup(cause),
        })
    }

    /// Acquires a resource, uses it, and releases it.
    ///
    /// `acquire` and `release` run uninterruptibly; `use_` runs with the
    /// caller's interruptibility. Once `acquire` succeeds, `release` runs
    /// exactly once, whether `use_` succeeds, fails, dies or is interrupted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fibrant::prelude::*;
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    ///
    /// let released = Arc::new(AtomicBool::new(false));
    /// let flag = Arc::clone(&released);
    /// let program: IO<&str, i32> = Effect::bracket(
    ///     Effect::succeed(10),
    ///     |resource| Effect::fail("boom").map(move |()| resource),
    ///     move |_| Effect::effect_total(move || flag.store(true, Ordering::SeqCst)),
    /// );
    ///
    /// let exit = Runtime::default().run_blocking(program);
    /// assert_eq!(exit, Exit::fail("boom"));
    /// assert!(released.load(Ordering::SeqCst));
    /// ```
    pub fn bracket<Resource, U, F>(acquire: Effect<R, E, Resource>, use_: U, release: F) -> Self
    where
        Resource: Clone + Send + 'static,
        U: FnOnce(Resource) -> Self + Send + 'static,
        F: FnOnce(Resource) -> Effect<R, Never, ()> + Send + 'static,
    {
        Self::bracket_exit(acquire, use_, move |resource, _| release(resource))
    }

    /// Like [`Effect::bracket`], but `release` also sees how `use_` ended.
    pub fn bracket_exit<Resource, U, F>(
        acquire: Effect<R, E, Resource>,
        use_: U,
        release: F,
    ) -> Self
    where
        Resource: Clone + Send + 'static,
        U: FnOnce(Resource) -> Self + Send + 'static,
        F: FnOnce(Resource, &Exit<E, A>) -> Effect<R, Never, ()> + Send + 'static,
    {
        Self::uninterruptible_mask(move |restore| {
            acquire.flat_map(move |resource| {
                let for_release = resource.clone();
                restore
                    .apply(Self::suspend(move || use_(resource)))
                    .exit()
                    .flat_map(move |exit| {
                        release(for_release, &exit)
                            .exit()
                            .flat_map(move |finalized| after_finalizer(exit, finalized))
                    })
            })
        })
    }
}
