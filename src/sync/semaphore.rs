//! Counting semaphore with FIFO waiters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Promise, Ref};
use crate::effect::{Effect, InterruptStatusRestore, Never};
use crate::fiber::Exit;

#[derive(Clone)]
struct Waiter {
    id: u64,
    promise: Promise<Never, ()>,
    needed: usize,
}

#[derive(Clone)]
enum State {
    Available(usize),
    Waiting(VecDeque<Waiter>),
}

enum Reservation {
    Acquired,
    Pending { id: u64, promise: Promise<Never, ()> },
}

/// Hands `permits` back, first to the queued waiters in order.
///
/// Returns the promises of waiters that are now fully served; they must be
/// completed once the new state is published.
fn release(state: &State, permits: usize) -> (Vec<Promise<Never, ()>>, State) {
    match state {
        State::Available(available) => (Vec::new(), State::Available(available + permits)),
        State::Waiting(queue) => {
            let mut queue = queue.clone();
            let mut remaining = permits;
            let mut served = Vec::new();
            while remaining > 0 {
                let Some(front) = queue.front_mut() else {
                    break;
                };
                if front.needed <= remaining {
                    remaining -= front.needed;
                    if let Some(waiter) = queue.pop_front() {
                        served.push(waiter.promise);
                    }
                } else {
                    front.needed -= remaining;
                    remaining = 0;
                }
            }
            let next = if queue.is_empty() {
                State::Available(remaining)
            } else {
                State::Waiting(queue)
            };
            (served, next)
        }
    }
}

/// A semaphore whose permits are handed out in request order.
///
/// A request for `n` permits takes what is available and waits for the rest;
/// requests queued behind it wait their turn even if enough permits come
/// back for them first. A waiting fiber that is interrupted returns the
/// permits it had collected.
///
/// # Examples
///
/// ```rust
/// use fibrant::prelude::*;
///
/// let program: UIO<usize> = Semaphore::make(2).flat_map(|semaphore: Semaphore| {
///     let inner = semaphore.clone();
///     semaphore.with_permits(2, inner.available())
/// });
///
/// assert_eq!(Runtime::default().run_blocking(program), Exit::Success(0));
/// ```
#[derive(Clone)]
pub struct Semaphore {
    state: Ref<State>,
    next_waiter: Arc<AtomicU64>,
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

impl Semaphore {
    /// Creates a semaphore outside of any effect.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Ref::new(State::Available(permits)),
            next_waiter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a semaphore with `permits` permits.
    pub fn make<R: 'static, E: Send + 'static>(permits: usize) -> Effect<R, E, Self> {
        Effect::effect_total(move || Self::new(permits))
    }

    /// The number of permits that can be taken without waiting.
    pub fn available<R: 'static, E: Send + 'static>(&self) -> Effect<R, E, usize> {
        self.state.get().map(|state| match state {
            State::Available(permits) => permits,
            State::Waiting(_) => 0,
        })
    }

    /// Runs `effect` while holding one permit.
    pub fn with_permit<R, E, A>(&self, effect: Effect<R, E, A>) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        A: Send + 'static,
    {
        self.with_permits(1, effect)
    }

    /// Runs `effect` while holding `permits` permits.
    ///
    /// The permits are returned however `effect` ends.
    pub fn with_permits<R, E, A>(&self, permits: usize, effect: Effect<R, E, A>) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        A: Send + 'static,
    {
        let semaphore = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            semaphore.reserve(permits).flat_map(move |reservation| {
                let releaser = semaphore.clone();
                semaphore
                    .wait(reservation, permits, restore)
                    .then(restore.apply(effect).ensuring(releaser.release_n(permits)))
            })
        })
    }

    /// Takes `permits` permits, waiting until they are available.
    pub fn acquire_n<R: 'static, E: Send + 'static>(&self, permits: usize) -> Effect<R, E, ()> {
        let semaphore = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            semaphore
                .reserve(permits)
                .flat_map(move |reservation| semaphore.wait(reservation, permits, restore))
        })
    }

    /// Returns `permits` permits, serving waiters first.
    pub fn release_n<R: 'static, E: Send + 'static>(&self, permits: usize) -> Effect<R, E, ()> {
        self.state
            .modify(move |state| release(state, permits))
            .flat_map(complete_all)
    }

    fn reserve<R: 'static, E: Send + 'static>(&self, permits: usize) -> Effect<R, E, Reservation> {
        let state = self.state.clone();
        let next_waiter = Arc::clone(&self.next_waiter);
        Effect::suspend(move || {
            let id = next_waiter.fetch_add(1, Ordering::Relaxed);
            let promise = Promise::new();
            state.modify(move |current| match current {
                _ if permits == 0 => (Reservation::Acquired, current.clone()),
                State::Available(available) if *available >= permits => {
                    (Reservation::Acquired, State::Available(available - permits))
                }
                State::Available(available) => {
                    let waiter = Waiter {
                        id,
                        promise: promise.clone(),
                        needed: permits - available,
                    };
                    (
                        Reservation::Pending {
                            id,
                            promise: promise.clone(),
                        },
                        State::Waiting(VecDeque::from([waiter])),
                    )
                }
                State::Waiting(queue) => {
                    let mut queue = queue.clone();
                    queue.push_back(Waiter {
                        id,
                        promise: promise.clone(),
                        needed: permits,
                    });
                    (
                        Reservation::Pending {
                            id,
                            promise: promise.clone(),
                        },
                        State::Waiting(queue),
                    )
                }
            })
        })
    }

    fn wait<R: 'static, E: Send + 'static>(
        &self,
        reservation: Reservation,
        permits: usize,
        restore: InterruptStatusRestore,
    ) -> Effect<R, E, ()> {
        match reservation {
            Reservation::Acquired => Effect::unit(),
            Reservation::Pending { id, promise } => restore
                .apply(promise.await_value::<R>().widen_error())
                .on_interrupt(self.cancel(id, permits)),
        }
    }

    /// Withdraws waiter `id`, returning whatever it had already collected.
    fn cancel<R: 'static>(&self, id: u64, permits: usize) -> Effect<R, Never, ()> {
        self.state
            .modify(move |state| {
                let State::Waiting(queue) = state else {
                    return release(state, permits);
                };
                let Some(position) = queue.iter().position(|waiter| waiter.id == id) else {
                    return release(state, permits);
                };
                let mut queue = queue.clone();
                let collected = queue
                    .remove(position)
                    .map_or(0, |waiter| permits - waiter.needed);
                let remaining = if queue.is_empty() {
                    State::Available(0)
                } else {
                    State::Waiting(queue)
                };
                release(&remaining, collected)
            })
            .flat_map(complete_all)
    }
}

fn complete_all<R: 'static, E: Send + 'static>(promises: Vec<Promise<Never, ()>>) -> Effect<R, E, ()> {
    Effect::effect_total(move || {
        for promise in promises {
            promise.complete_now(Exit::Success(()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn waiter(id: u64, needed: usize) -> Waiter {
        Waiter {
            id,
            promise: Promise::new(),
            needed,
        }
    }

    fn needs(state: &State) -> Vec<usize> {
        match state {
            State::Available(_) => Vec::new(),
            State::Waiting(queue) => queue.iter().map(|waiter| waiter.needed).collect(),
        }
    }

    #[rstest]
    fn release_to_available_adds_permits() {
        let (served, next) = release(&State::Available(1), 2);
        assert!(served.is_empty());
        assert!(matches!(next, State::Available(3)));
    }

    #[rstest]
    fn release_serves_waiters_in_order() {
        let state = State::Waiting(VecDeque::from([waiter(0, 1), waiter(1, 2)]));
        let (served, next) = release(&state, 2);
        assert_eq!(served.len(), 1);
        assert_eq!(needs(&next), vec![1]);
    }

    #[rstest]
    fn release_leftover_becomes_available() {
        let state = State::Waiting(VecDeque::from([waiter(0, 1)]));
        let (served, next) = release(&state, 3);
        assert_eq!(served.len(), 1);
        assert!(matches!(next, State::Available(2)));
    }
}
