//! Structured failure causes.
//!
//! A [`Cause`] records *why* a fiber did not produce a value. It keeps the
//! three kinds of failure apart:
//!
//! - **typed failures** (`Fail`): expected domain errors, recoverable by
//!   ordinary error handlers
//! - **defects** (`Die`): panics and other programming errors
//! - **interruptions** (`Interrupt`): cooperative cancellation, tagged with the
//!   fiber that asked for it
//!
//! Several failures can happen during one computation. `Then` records a
//! failure that happened *after* another one (for example a finalizer that
//! failed while cleaning up after a failed computation), and `Both` records
//! failures that happened *concurrently* in sibling fibers. The two are never
//! conflated.
//!
//! # Equality
//!
//! `Cause` equality is structural modulo the algebra the combinators obey:
//! `Then` and `Both` are associative, `Both` is commutative and `Empty` is the
//! identity of both. This makes
//! `a.then(b).then(c) == a.then(b.then(c))` hold for every `a`, `b` and `c`.
//!
//! ```rust
//! use fibrant::fiber::{Cause, FiberId};
//!
//! let a = Cause::fail("a");
//! let b = Cause::die_message("b");
//! let c = Cause::interrupt(FiberId::from_raw(3));
//!
//! assert_eq!(
//!     a.clone().then(b.clone()).then(c.clone()),
//!     a.then(b.then(c)),
//! );
//! ```

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::id::FiberId;

// =============================================================================
// Defect
// =============================================================================

/// An unexpected failure: a panic or a programming error.
///
/// Defects are not part of an effect's typed error channel. Ordinary error
/// handlers such as [`catch_all`](crate::effect::Effect::catch_all) let them
/// pass; only handlers that inspect the whole [`Cause`] can observe them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: Arc<str>,
}

impl Defect {
    /// Creates a defect from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Converts a panic payload, as returned by `catch_unwind`, into a defect.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(string) = payload.downcast_ref::<&str>() {
            (*string).to_string()
        } else if let Some(string) = payload.downcast_ref::<String>() {
            string.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::new(message)
    }

    /// Returns the defect's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.message)
    }
}

// =============================================================================
// Cause
// =============================================================================

/// The full record of one or more failures, defects and interruptions.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// No failure. The identity of [`Cause::then`] and [`Cause::both`].
    Empty,
    /// A typed, recoverable failure.
    Fail(E),
    /// A defect.
    Die(Defect),
    /// An interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// A typed failure.
    #[inline]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[inline]
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// A defect built from a message.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// An interruption requested by `fiber_id`.
    #[inline]
    #[must_use]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Interrupt(fiber_id)
    }

    /// Sequential composition: `self` happened, then `that`.
    ///
    /// `Empty` on either side is dropped.
    #[must_use]
    pub fn then(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, right) => right,
            (left, Self::Empty) => left,
            (left, right) => Self::Then(Box::new(left), Box::new(right)),
        }
    }

    /// Parallel composition: `self` and `that` happened concurrently.
    ///
    /// `Empty` on either side is dropped.
    #[must_use]
    pub fn both(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, right) => right,
            (left, Self::Empty) => left,
            (left, right) => Self::Both(Box::new(left), Box::new(right)),
        }
    }

    /// Returns `true` if the cause contains no failure of any kind.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().next().is_none()
    }

    /// Returns `true` if the cause contains a typed failure.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Returns `true` if the cause contains a defect.
    #[must_use]
    pub fn died(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// Returns `true` if the cause contains an interruption.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// Returns `true` if the cause is non-empty and made only of interruptions.
    #[must_use]
    pub fn interrupted_only(&self) -> bool {
        let mut leaves = self.leaves().peekable();
        leaves.peek().is_some() && leaves.all(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// All typed failures, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Fail(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    /// The first typed failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&E> {
        self.leaves().find_map(|leaf| match leaf {
            Self::Fail(error) => Some(error),
            _ => None,
        })
    }

    /// All defects, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Die(defect) => Some(defect),
                _ => None,
            })
            .collect()
    }

    /// The set of fibers that requested an interruption.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Self::Interrupt(fiber_id) => Some(*fiber_id),
                _ => None,
            })
            .collect()
    }

    /// Extracts the first typed failure, or gives the cause back untouched if
    /// it carries anything a typed handler may not claim.
    ///
    /// This is how ordinary error handlers decide whether they may claim a
    /// cause: only causes made of typed failures alone yield an `Ok`, so a
    /// defect or interruption next to a failure is never dropped.
    ///
    /// # Errors
    ///
    /// Returns the cause itself when it has no typed failure, or when it
    /// also holds a defect or an interruption.
    pub fn into_failure_or_cause(self) -> Result<E, Self> {
        if self.failed() && !self.died() && !self.interrupted() {
            self.take_first_failure()
        } else {
            Err(self)
        }
    }

    fn take_first_failure(self) -> Result<E, Self> {
        match self {
            Self::Fail(error) => Ok(error),
            Self::Then(left, right) => match left.take_first_failure() {
                Ok(error) => Ok(error),
                Err(left) => right
                    .take_first_failure()
                    .map_err(|right| Self::Then(Box::new(left), Box::new(right))),
            },
            Self::Both(left, right) => match left.take_first_failure() {
                Ok(error) => Ok(error),
                Err(left) => right
                    .take_first_failure()
                    .map_err(|right| Self::Both(Box::new(left), Box::new(right))),
            },
            other => Err(other),
        }
    }

    /// Transforms every typed failure with `function`.
    pub fn map<E2, F>(self, function: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        let mut function = function;
        self.map_with(&mut function)
    }

    fn map_with<E2, F>(self, function: &mut F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(error) => Cause::Fail(function(error)),
            Self::Die(defect) => Cause::Die(defect),
            Self::Interrupt(fiber_id) => Cause::Interrupt(fiber_id),
            Self::Then(left, right) => Cause::Then(
                Box::new(left.map_with(function)),
                Box::new(right.map_with(function)),
            ),
            Self::Both(left, right) => Cause::Both(
                Box::new(left.map_with(function)),
                Box::new(right.map_with(function)),
            ),
        }
    }

    /// Removes every typed failure, keeping defects and interruptions.
    ///
    /// Returns `None` if nothing remains.
    #[must_use]
    pub fn strip_failures(self) -> Option<Self> {
        match self {
            Self::Empty | Self::Fail(_) => None,
            Self::Die(defect) => Some(Self::Die(defect)),
            Self::Interrupt(fiber_id) => Some(Self::Interrupt(fiber_id)),
            Self::Then(left, right) => match (left.strip_failures(), right.strip_failures()) {
                (Some(left), Some(right)) => Some(left.then(right)),
                (Some(cause), None) | (None, Some(cause)) => Some(cause),
                (None, None) => None,
            },
            Self::Both(left, right) => match (left.strip_failures(), right.strip_failures()) {
                (Some(left), Some(right)) => Some(left.both(right)),
                (Some(cause), None) | (None, Some(cause)) => Some(cause),
                (None, None) => None,
            },
        }
    }

    /// Drops every typed failure, re-typing what remains.
    ///
    /// Lossless for causes where [`Cause::failed`] is `false`, which is how
    /// error handlers forward defects and interruptions across a change of
    /// error type.
    pub fn discard_failures<E2>(self) -> Cause<E2> {
        match self {
            Self::Empty | Self::Fail(_) => Cause::Empty,
            Self::Die(defect) => Cause::Die(defect),
            Self::Interrupt(fiber_id) => Cause::Interrupt(fiber_id),
            Self::Then(left, right) => left.discard_failures().then(right.discard_failures()),
            Self::Both(left, right) => left.discard_failures().both(right.discard_failures()),
        }
    }

    /// Iterates over the leaves (`Fail`, `Die`, `Interrupt`) left to right.
    pub fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }
}

/// Iterator over the leaves of a [`Cause`], created by [`Cause::leaves`].
pub struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = &'a Cause<E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(cause) = self.stack.pop() {
            match cause {
                Cause::Empty => {}
                Cause::Then(left, right) | Cause::Both(left, right) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
                leaf => return Some(leaf),
            }
        }
        None
    }
}

// =============================================================================
// Equality (modulo associativity, commutativity of Both, Empty identity)
// =============================================================================

enum Shape<'a, E> {
    Leaf(&'a Cause<E>),
    Sequence(Vec<Shape<'a, E>>),
    Parallel(Vec<Shape<'a, E>>),
}

fn shape<E>(cause: &Cause<E>) -> Option<Shape<'_, E>> {
    match cause {
        Cause::Empty => None,
        Cause::Then(left, right) => {
            let mut parts = Vec::new();
            for child in [left.as_ref(), right.as_ref()] {
                match shape(child) {
                    None => {}
                    Some(Shape::Sequence(inner)) => parts.extend(inner),
                    Some(other) => parts.push(other),
                }
            }
            collapse(parts, Shape::Sequence)
        }
        Cause::Both(left, right) => {
            let mut parts = Vec::new();
            for child in [left.as_ref(), right.as_ref()] {
                match shape(child) {
                    None => {}
                    Some(Shape::Parallel(inner)) => parts.extend(inner),
                    Some(other) => parts.push(other),
                }
            }
            collapse(parts, Shape::Parallel)
        }
        leaf => Some(Shape::Leaf(leaf)),
    }
}

fn collapse<'a, E>(
    mut parts: Vec<Shape<'a, E>>,
    build: fn(Vec<Shape<'a, E>>) -> Shape<'a, E>,
) -> Option<Shape<'a, E>> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(build(parts)),
    }
}

fn shapes_equal<E: PartialEq>(left: &Shape<'_, E>, right: &Shape<'_, E>) -> bool {
    match (left, right) {
        (Shape::Leaf(left), Shape::Leaf(right)) => match (left, right) {
            (Cause::Fail(left), Cause::Fail(right)) => left == right,
            (Cause::Die(left), Cause::Die(right)) => left == right,
            (Cause::Interrupt(left), Cause::Interrupt(right)) => left == right,
            _ => false,
        },
        (Shape::Sequence(left), Shape::Sequence(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(left, right)| shapes_equal(left, right))
        }
        (Shape::Parallel(left), Shape::Parallel(right)) => {
            if left.len() != right.len() {
                return false;
            }
            let mut used = vec![false; right.len()];
            left.iter().all(|candidate| {
                let position = right
                    .iter()
                    .enumerate()
                    .position(|(index, other)| !used[index] && shapes_equal(candidate, other));
                position.is_some_and(|index| {
                    used[index] = true;
                    true
                })
            })
        }
        _ => false,
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        match (shape(self), shape(other)) {
            (None, None) => true,
            (Some(left), Some(right)) => shapes_equal(&left, &right),
            _ => false,
        }
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(formatter, "Empty"),
            Self::Fail(error) => write!(formatter, "Fail({error})"),
            Self::Die(defect) => write!(formatter, "Die({defect})"),
            Self::Interrupt(fiber_id) => write!(formatter, "Interrupt({fiber_id})"),
            Self::Then(left, right) => write!(formatter, "({left} ++ {right})"),
            Self::Both(left, right) => write!(formatter, "({left} && {right})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn interrupt(sequence: u64) -> Cause<&'static str> {
        Cause::interrupt(FiberId::from_raw(sequence))
    }

    #[rstest]
    fn empty_is_identity_of_then_and_both() {
        let cause = Cause::fail("boom");
        assert_eq!(Cause::Empty.then(cause.clone()), cause);
        assert_eq!(cause.clone().then(Cause::Empty), cause);
        assert_eq!(Cause::Empty.both(cause.clone()), cause);
        assert_eq!(cause.clone().both(Cause::Empty), cause);
    }

    #[rstest]
    fn then_is_not_commutative() {
        let left = Cause::fail("a").then(Cause::fail("b"));
        let right = Cause::fail("b").then(Cause::fail("a"));
        assert_ne!(left, right);
    }

    #[rstest]
    fn both_is_commutative() {
        let left = Cause::fail("a").both(Cause::die_message("b"));
        let right = Cause::die_message("b").both(Cause::fail("a"));
        assert_eq!(left, right);
    }

    #[rstest]
    fn then_and_both_are_not_conflated() {
        let sequential = Cause::fail("a").then(Cause::fail("b"));
        let parallel = Cause::fail("a").both(Cause::fail("b"));
        assert_ne!(sequential, parallel);
    }

    #[rstest]
    fn structural_empty_nodes_are_ignored_by_equality() {
        let nested = Cause::Then(Box::new(Cause::Empty), Box::new(Cause::fail("a")));
        assert_eq!(nested, Cause::fail("a"));
        assert!(Cause::<()>::Both(Box::new(Cause::Empty), Box::new(Cause::Empty)).is_empty());
    }

    #[rstest]
    fn queries_report_leaf_kinds() {
        let cause = Cause::fail("a")
            .then(Cause::die_message("b"))
            .both(interrupt(9));
        assert!(cause.failed());
        assert!(cause.died());
        assert!(cause.interrupted());
        assert!(!cause.interrupted_only());
        assert_eq!(cause.failures(), vec![&"a"]);
        assert_eq!(cause.defects()[0].message(), "b");
        assert!(cause.interruptors().contains(&FiberId::from_raw(9)));
    }

    #[rstest]
    fn interrupted_only_requires_a_leaf() {
        assert!(!Cause::<()>::Empty.interrupted_only());
        assert!(interrupt(1).both(interrupt(2)).interrupted_only());
    }

    #[rstest]
    fn into_failure_or_cause_takes_first_failure() {
        let cause = Cause::fail("first").both(Cause::fail("second").then(Cause::fail("third")));
        assert_eq!(cause.into_failure_or_cause(), Ok("first"));
    }

    #[rstest]
    #[case::defect(Cause::fail("typed").both(Cause::die_message("defect")))]
    #[case::interruption(Cause::fail("typed").then(interrupt(3)))]
    fn into_failure_or_cause_refuses_mixed_causes(#[case] cause: Cause<&'static str>) {
        assert_eq!(cause.clone().into_failure_or_cause(), Err(cause));
    }

    #[rstest]
    fn into_failure_or_cause_keeps_defects_and_interruptions() {
        let cause = Cause::<&str>::die_message("d").both(interrupt(4));
        let result = cause.clone().into_failure_or_cause();
        assert_eq!(result, Err(cause));
    }

    #[rstest]
    fn map_transforms_only_failures() {
        let cause = Cause::fail(2).then(Cause::die_message("d"));
        let mapped = cause.map(|value| value * 10);
        assert_eq!(mapped, Cause::fail(20).then(Cause::die_message("d")));
    }

    #[rstest]
    fn strip_failures_keeps_the_rest() {
        let cause = Cause::fail("a").both(interrupt(1)).then(Cause::fail("b"));
        assert_eq!(cause.strip_failures(), Some(interrupt(1)));
        assert_eq!(Cause::fail("only").strip_failures(), None);
    }

    #[rstest]
    fn display_renders_tree() {
        let cause = Cause::fail("a").then(Cause::die_message("b"));
        assert_eq!(cause.to_string(), "(Fail(a) ++ Die(b))");
    }

    #[rstest]
    fn defect_from_panic_payloads() {
        let from_str = Defect::from_panic(Box::new("static"));
        let from_string = Defect::from_panic(Box::new(String::from("owned")));
        let from_other = Defect::from_panic(Box::new(42_u8));
        assert_eq!(from_str.message(), "static");
        assert_eq!(from_string.message(), "owned");
        assert_eq!(from_other.message(), "Unknown panic");
    }
}
