//! Fiber-local state.
//!
//! A [`FiberRef`] holds one value per fiber. A forked child starts with the
//! result of the ref's `fork` function applied to the parent's value, and
//! [`Fiber::join`](crate::fiber::Fiber::join) merges the child's final value
//! back into the joiner with the ref's `join` function.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::effect::Effect;
use crate::effect::instruction::{Instruction, erase};

/// A type-erased fiber-local value.
pub(crate) type RefValue = Arc<dyn Any + Send + Sync>;

static NEXT_FIBER_REF_KEY: AtomicU64 = AtomicU64::new(1);

/// Erased behaviour of one fiber ref, used when fibers fork and join.
pub(crate) trait FiberRefOps: Send + Sync {
    fn initial(&self) -> RefValue;
    fn fork(&self, parent: &RefValue) -> RefValue;
    fn join(&self, parent: &RefValue, child: &RefValue) -> RefValue;
}

struct TypedOps<A> {
    initial: A,
    fork: Box<dyn Fn(&A) -> A + Send + Sync>,
    join: Box<dyn Fn(&A, &A) -> A + Send + Sync>,
}

fn downcast<A: 'static>(value: &RefValue) -> &A {
    value
        .downcast_ref::<A>()
        .expect("fiber ref invariant violated: stored value has an unexpected type")
}

impl<A: Clone + Send + Sync + 'static> FiberRefOps for TypedOps<A> {
    fn initial(&self) -> RefValue {
        Arc::new(self.initial.clone())
    }

    fn fork(&self, parent: &RefValue) -> RefValue {
        Arc::new((self.fork)(downcast::<A>(parent)))
    }

    fn join(&self, parent: &RefValue, child: &RefValue) -> RefValue {
        Arc::new((self.join)(downcast::<A>(parent), downcast::<A>(child)))
    }
}

#[derive(Clone)]
struct Entry {
    value: RefValue,
    ops: Arc<dyn FiberRefOps>,
}

/// The fiber-local values of one fiber, keyed by ref.
#[derive(Clone, Default)]
pub(crate) struct FiberRefs {
    entries: HashMap<u64, Entry>,
}

impl FiberRefs {
    fn get_or_initial(&self, key: u64, ops: &Arc<dyn FiberRefOps>) -> RefValue {
        self.entries
            .get(&key)
            .map_or_else(|| ops.initial(), |entry| Arc::clone(&entry.value))
    }

    fn set(&mut self, key: u64, ops: &Arc<dyn FiberRefOps>, value: RefValue) {
        self.entries.insert(
            key,
            Entry {
                value,
                ops: Arc::clone(ops),
            },
        );
    }

    /// The values a newly forked child starts with.
    pub(crate) fn forked(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(key, entry)| {
                (
                    *key,
                    Entry {
                        value: entry.ops.fork(&entry.value),
                        ops: Arc::clone(&entry.ops),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Merges the final values of a joined child into these values.
    pub(crate) fn join(&mut self, child: &Self) {
        for (key, child_entry) in &child.entries {
            let parent = self.get_or_initial(*key, &child_entry.ops);
            let merged = child_entry.ops.join(&parent, &child_entry.value);
            self.set(*key, &child_entry.ops, merged);
        }
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FiberRefs")
            .field("len", &self.entries.len())
            .finish()
    }
}

// =============================================================================
// FiberRef
// =============================================================================

/// A reference whose value is local to each fiber.
///
/// # Examples
///
/// ```rust
/// use fibrant::prelude::*;
///
/// let runtime = Runtime::default();
/// let program: UIO<(u32, u32)> = FiberRef::make(1).flat_map(|fiber_ref: FiberRef<u32>| {
///     let inner = fiber_ref.clone();
///     fiber_ref
///         .locally(5, inner.get())
///         .flat_map(move |inside| fiber_ref.get().map(move |outside| (inside, outside)))
/// });
///
/// assert_eq!(runtime.run_blocking(program), Exit::Success((5, 1)));
/// ```
pub struct FiberRef<A> {
    key: u64,
    ops: Arc<dyn FiberRefOps>,
    _marker: std::marker::PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            ops: Arc::clone(&self.ops),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FiberRef")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<A: Clone + Send + Sync + 'static> FiberRef<A> {
    /// Creates a fiber ref whose children copy the parent's value and whose
    /// joins keep the child's value.
    pub fn make<R: 'static, E: Send + 'static>(initial: A) -> Effect<R, E, Self> {
        Self::make_with(initial, A::clone, |_, child| child.clone())
    }

    /// Creates a fiber ref with custom fork and join behaviour.
    ///
    /// The creating fiber holds `initial` from the start, so children forked
    /// before any update already see `fork(initial)`.
    pub fn make_with<R, E, F, J>(initial: A, fork: F, join: J) -> Effect<R, E, Self>
    where
        R: 'static,
        E: Send + 'static,
        F: Fn(&A) -> A + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        Effect::from_instruction(Instruction::FiberRefs(Box::new(move |refs| {
            let ops: Arc<dyn FiberRefOps> = Arc::new(TypedOps {
                initial,
                fork: Box::new(fork),
                join: Box::new(join),
            });
            let key = NEXT_FIBER_REF_KEY.fetch_add(1, Ordering::Relaxed);
            refs.set(key, &ops, ops.initial());
            erase(Self {
                key,
                ops,
                _marker: std::marker::PhantomData,
            })
        })))
    }

    /// Atomically replaces the current fiber's value and returns a result
    /// computed from the previous one.
    pub fn modify<R, E, B, F>(&self, function: F) -> Effect<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
        F: FnOnce(&A) -> (B, A) + Send + 'static,
    {
        let key = self.key;
        let ops = Arc::clone(&self.ops);
        Effect::from_instruction(Instruction::FiberRefs(Box::new(move |refs| {
            let current = refs.get_or_initial(key, &ops);
            let (result, next) = function(downcast::<A>(&current));
            refs.set(key, &ops, Arc::new(next));
            erase(result)
        })))
    }

    /// Reads the current fiber's value.
    pub fn get<R: 'static, E: Send + 'static>(&self) -> Effect<R, E, A> {
        let key = self.key;
        let ops = Arc::clone(&self.ops);
        Effect::from_instruction(Instruction::FiberRefs(Box::new(move |refs| {
            let current = refs.get_or_initial(key, &ops);
            erase(downcast::<A>(&current).clone())
        })))
    }

    /// Sets the current fiber's value.
    pub fn set<R: 'static, E: Send + 'static>(&self, value: A) -> Effect<R, E, ()> {
        self.modify(move |_| ((), value))
    }

    /// Transforms the current fiber's value.
    pub fn update<R, E, F>(&self, function: F) -> Effect<R, E, ()>
    where
        R: 'static,
        E: Send + 'static,
        F: FnOnce(&A) -> A + Send + 'static,
    {
        self.modify(move |current| ((), function(current)))
    }

    /// Sets the current fiber's value and returns the previous one.
    pub fn get_and_set<R: 'static, E: Send + 'static>(&self, value: A) -> Effect<R, E, A> {
        self.modify(move |current| (current.clone(), value))
    }

    /// Runs `effect` with the value temporarily set to `value`, restoring the
    /// previous value afterwards whatever the outcome.
    pub fn locally<R, E, B>(&self, value: A, effect: Effect<R, E, B>) -> Effect<R, E, B>
    where
        R: 'static,
        E: Send + 'static,
        B: Send + 'static,
    {
        let restore_ref = self.clone();
        Effect::bracket(
            self.get_and_set(value),
            move |_| effect,
            move |previous| restore_ref.set(previous),
        )
    }
}
