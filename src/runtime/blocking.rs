//! Blocking on a future from synchronous code.

use std::future::Future;

use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

use super::executor::global;

/// Why [`try_block_on`] could not block the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockingError {
    /// `block_in_place` is only supported on multi-thread runtimes.
    #[error(
        "cannot block inside a current-thread runtime: \
         block_in_place is only supported in multi-thread runtimes"
    )]
    CurrentThreadRuntime,

    /// The runtime flavor is not one this crate knows how to block on.
    #[error("cannot block: the runtime flavor is not supported for blocking execution")]
    UnsupportedRuntimeFlavor,
}

/// Runs `future` to completion on the current thread.
///
/// - Inside a multi-thread runtime: `block_in_place` on the current handle.
/// - Inside a current-thread runtime: refuses with
///   [`BlockingError::CurrentThreadRuntime`].
/// - Outside any runtime: `block_on` on the global runtime.
///
/// # Errors
///
/// Returns [`BlockingError`] when the current thread belongs to a runtime
/// that cannot be blocked.
pub fn try_block_on<F, T>(future: F) -> Result<T, BlockingError>
where
    F: Future<Output = T>,
{
    let Ok(current) = Handle::try_current() else {
        return Ok(global().block_on(future));
    };
    match current.runtime_flavor() {
        RuntimeFlavor::MultiThread => {
            Ok(tokio::task::block_in_place(|| current.block_on(future)))
        }
        RuntimeFlavor::CurrentThread => Err(BlockingError::CurrentThreadRuntime),
        _ => Err(BlockingError::UnsupportedRuntimeFlavor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn outside_runtime_uses_global() {
        assert_eq!(try_block_on(async { 42 }), Ok(42));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inside_multi_thread_runtime() {
        let result = tokio::task::spawn_blocking(|| try_block_on(async { 42 }))
            .await
            .unwrap();
        assert_eq!(result, Ok(42));
    }

    #[rstest]
    #[tokio::test(flavor = "current_thread")]
    async fn inside_current_thread_runtime_is_refused() {
        let result = tokio::task::spawn_blocking(|| try_block_on(async { 42 }))
            .await
            .unwrap();
        assert_eq!(result, Err(BlockingError::CurrentThreadRuntime));
    }

    #[rstest]
    fn error_messages() {
        assert!(
            BlockingError::CurrentThreadRuntime
                .to_string()
                .contains("block_in_place")
        );
        assert!(
            BlockingError::UnsupportedRuntimeFlavor
                .to_string()
                .contains("not supported")
        );
    }
}
