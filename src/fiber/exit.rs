//! Terminal results of fibers.

use std::fmt;

use super::cause::Cause;

/// The terminal outcome of a fiber: a value or the [`Cause`] of its failure.
///
/// Every fiber produces exactly one `Exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<E, A> {
    /// The computation produced a value.
    Success(A),
    /// The computation failed, died or was interrupted.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    /// A successful exit.
    #[inline]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// An exit failed with a typed error.
    #[inline]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// An exit failed with the given cause.
    #[inline]
    pub const fn halt(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// Returns `true` for [`Exit::Success`].
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for [`Exit::Failure`].
    #[inline]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` if the exit is a failure whose cause contains an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.interrupted(),
        }
    }

    /// Returns the value of a successful exit.
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the cause of a failed exit.
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Transforms the success value.
    pub fn map<B, F>(self, function: F) -> Exit<E, B>
    where
        F: FnOnce(A) -> B,
    {
        match self {
            Self::Success(value) => Exit::Success(function(value)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Transforms every typed failure in the cause.
    pub fn map_err<E2, F>(self, function: F) -> Exit<E2, A>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(cause.map(function)),
        }
    }

    /// Combines two exits, keeping both values, or combining both causes in
    /// parallel when both failed.
    pub fn zip_par<B>(self, that: Exit<E, B>) -> Exit<E, (A, B)> {
        match (self, that) {
            (Self::Success(left), Exit::Success(right)) => Exit::Success((left, right)),
            (Self::Failure(left), Exit::Failure(right)) => Exit::Failure(left.both(right)),
            (Self::Failure(cause), Exit::Success(_)) | (Self::Success(_), Exit::Failure(cause)) => {
                Exit::Failure(cause)
            }
        }
    }

    /// Converts the exit into a `Result`, keeping the full cause on failure.
    ///
    /// # Errors
    ///
    /// Returns [`FiberFailure`] carrying the cause when the exit is a failure.
    pub fn into_result(self) -> Result<A, FiberFailure<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(cause) => Err(FiberFailure { cause }),
        }
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::fail(error),
        }
    }
}

// =============================================================================
// FiberFailure
// =============================================================================

/// An uncaught failure of a fiber, carrying the full [`Cause`].
///
/// This is what a failed root fiber surfaces as when its [`Exit`] is turned
/// into a `Result` at the edge of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberFailure<E> {
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    /// Returns the cause of the failure.
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Consumes the failure and returns its cause.
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }

    /// Returns `true` if the fiber was interrupted and nothing else went wrong.
    pub fn is_interruption_only(&self) -> bool {
        self.cause.interrupted_only()
    }
}

impl<E: fmt::Debug> fmt::Display for FiberFailure<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "fiber failed: {}", DisplayCause(&self.cause))
    }
}

impl<E: fmt::Debug> std::error::Error for FiberFailure<E> {}

/// Renders a cause with `Debug` for its typed failures so `FiberFailure` does
/// not require `E: Display`.
struct DisplayCause<'a, E>(&'a Cause<E>);

impl<E: fmt::Debug> fmt::Display for DisplayCause<'_, E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Cause::Empty => write!(formatter, "Empty"),
            Cause::Fail(error) => write!(formatter, "Fail({error:?})"),
            Cause::Die(defect) => write!(formatter, "Die({defect})"),
            Cause::Interrupt(fiber_id) => write!(formatter, "Interrupt({fiber_id})"),
            Cause::Then(left, right) => write!(
                formatter,
                "({} ++ {})",
                DisplayCause(left.as_ref()),
                DisplayCause(right.as_ref())
            ),
            Cause::Both(left, right) => write!(
                formatter,
                "({} && {})",
                DisplayCause(left.as_ref()),
                DisplayCause(right.as_ref())
            ),
        }
    }
}
