//! Lock-free mutable reference.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::effect::Effect;

/// A mutable cell shared between fibers.
///
/// Reads and writes are single atomic operations. Updates run the update
/// function against a snapshot and publish the result with compare-and-swap,
/// retrying from a fresh snapshot if another fiber won in between. Update
/// functions must therefore be pure: they can run more than once.
///
/// # Examples
///
/// ```rust
/// use fibrant::prelude::*;
///
/// let program: UIO<i32> = Ref::make(1).flat_map(|counter: Ref<i32>| {
///     counter.update(|value| value + 41).then(counter.get())
/// });
///
/// assert_eq!(Runtime::default().run_blocking(program), Exit::Success(42));
/// ```
pub struct Ref<A> {
    cell: Arc<ArcSwap<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("Ref")
            .field(&**self.cell.load())
            .finish()
    }
}

impl<A: Send + Sync + 'static> Ref<A> {
    /// Creates a reference outside of any effect.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Creates a reference holding `initial`.
    pub fn make<R: 'static, E: Send + 'static>(initial: A) -> Effect<R, E, Self> {
        Effect::effect_total(move || Self::new(initial))
    }

    /// Reads the current value.
    pub fn get<R: 'static, E: Send + 'static>(&self) -> Effect<R, E, A>
    where
        A: Clone,
    {
        let cell = Arc::clone(&self.cell);
        Effect::effect_total(move || A::clone(&cell.load()))
    }

    /// Replaces the current value.
    pub fn set<R: 'static, E: Send + 'static>(&self, value: A) -> Effect<R, E, ()> {
        let cell = Arc::clone(&self.cell);
        Effect::effect_total(move || cell.store(Arc::new(value)))
    }

    /// Atomically computes a result and a new value from the current one.
    pub fn modify<R, E, B, F>(&self, function: F) -> Effect<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
        F: FnMut(&A) -> (B, A) + Send + 'static,
    {
        let cell = Arc::clone(&self.cell);
        Effect::effect_total(move || compare_and_swap(&cell, function))
    }

    /// Atomically replaces the value with `function` applied to it.
    pub fn update<R, E, F>(&self, mut function: F) -> Effect<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: FnMut(&A) -> A + Send + 'static,
    {
        self.modify(move |current| ((), function(current)))
    }

    /// Like [`Ref::update`], returning the new value.
    pub fn update_and_get<R, E, F>(&self, mut function: F) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        A: Clone,
        F: FnMut(&A) -> A + Send + 'static,
    {
        self.modify(move |current| {
            let next = function(current);
            (next.clone(), next)
        })
    }

    /// Like [`Ref::update`], returning the previous value.
    pub fn get_and_update<R, E, F>(&self, mut function: F) -> Effect<R, E, A>
    where
        R: 'static,
        E: Send + 'static,
        A: Clone,
        F: FnMut(&A) -> A + Send + 'static,
    {
        self.modify(move |current| (current.clone(), function(current)))
    }

    /// Replaces the value, returning the previous one.
    pub fn get_and_set<R: 'static, E: Send + 'static>(&self, value: A) -> Effect<R, E, A>
    where
        A: Clone,
    {
        let cell = Arc::clone(&self.cell);
        Effect::effect_total(move || A::clone(&cell.swap(Arc::new(value))))
    }
}

fn compare_and_swap<A, B, F>(cell: &ArcSwap<A>, mut function: F) -> B
where
    F: FnMut(&A) -> (B, A),
{
    loop {
        let current = cell.load_full();
        let (result, next) = function(&current);
        let previous = cell.compare_and_swap(&current, Arc::new(next));
        if Arc::ptr_eq(&*previous, &current) {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn compare_and_swap_returns_result_and_publishes() {
        let cell = ArcSwap::from_pointee(10);
        let doubled = compare_and_swap(&cell, |value| (value * 2, value + 1));
        assert_eq!(doubled, 20);
        assert_eq!(**cell.load(), 11);
    }

    #[rstest]
    fn compare_and_swap_retries_after_conflict() {
        let cell = ArcSwap::from_pointee(0);
        let mut attempts = 0;
        let result = compare_and_swap(&cell, |value| {
            attempts += 1;
            if attempts == 1 {
                cell.store(Arc::new(100));
            }
            (*value, value + 1)
        });
        assert_eq!(attempts, 2);
        assert_eq!(result, 100);
        assert_eq!(**cell.load(), 101);
    }

    #[rstest]
    fn debug_shows_value() {
        assert_eq!(format!("{:?}", Ref::new(3)), "Ref(3)");
    }
}
