//! Where fibers run.
//!
//! Fibers are plain tasks submitted to an [`Executor`]. The default
//! [`TokioExecutor`] spawns them onto a tokio runtime: the one the caller is
//! running inside, or a lazily built process-wide multi-thread runtime.
//!
//! # Handle resolution
//!
//! 1. Inside a tokio runtime: `Handle::current()`, so fibers share the
//!    caller's worker pool and tracing context.
//! 2. Otherwise: a per-thread cached handle to [`global`].

use std::cell::RefCell;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

/// A unit of work: one slice of a fiber's run loop, or a timer callback.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs fiber slices and timers.
pub trait Executor: Send + Sync + 'static {
    /// Runs `task` soon, on some worker.
    fn submit(&self, task: Task);

    /// Runs `task` once `delay` has elapsed, unless the returned handle is
    /// cancelled first.
    fn submit_after(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancels a pending timer registered with [`Executor::submit_after`].
#[must_use = "dropping a timer handle does not cancel the timer"]
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Wraps a cancellation function.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle whose cancellation does nothing.
    #[must_use]
    pub const fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancels the timer. Has no effect if it already fired.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// Global Runtime
// =============================================================================

/// Process-wide runtime used when fibers are started outside of tokio.
///
/// Multi-thread, one worker per CPU core, never dropped.
static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("fibrant-worker")
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

/// Returns the process-wide runtime, building it on first use.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

thread_local! {
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Returns a handle to the current tokio runtime, or to [`global`] when the
/// caller is not inside one.
#[inline]
#[must_use]
pub fn handle() -> Handle {
    if let Ok(current) = Handle::try_current() {
        return current;
    }

    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| global().handle().clone())
            .clone()
    })
}

// =============================================================================
// TokioExecutor
// =============================================================================

/// An [`Executor`] backed by a tokio runtime handle.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Runs fibers on the runtime behind `handle`.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runs fibers on the runtime resolved by [`handle`].
    #[must_use]
    pub fn current() -> Self {
        Self::new(handle())
    }
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::current()
    }
}

impl Executor for TokioExecutor {
    fn submit(&self, task: Task) {
        drop(self.handle.spawn(async move { task() }));
    }

    fn submit_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || timer.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::ptr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[rstest]
    fn global_returns_same_instance() {
        assert!(ptr::eq(global(), global()));
    }

    #[rstest]
    fn handle_works_from_outside_runtime() {
        assert_eq!(handle().block_on(async { 42 }), 42);
    }

    #[rstest]
    #[tokio::test]
    async fn handle_prefers_current_runtime() {
        let result = handle().spawn(async { 7 }).await.unwrap();
        assert_eq!(result, 7);
    }

    #[rstest]
    fn submitted_tasks_run() {
        let executor = TokioExecutor::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::channel();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            let sender = sender.clone();
            executor.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                sender.send(()).unwrap();
            }));
        }
        for _ in 0..4 {
            receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[rstest]
    fn cancelled_timer_does_not_fire() {
        let executor = TokioExecutor::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let timer = executor.submit_after(
            Duration::from_millis(50),
            Box::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn timer_fires_after_delay() {
        let executor = TokioExecutor::current();
        let (sender, receiver) = mpsc::channel();
        let _timer = executor.submit_after(
            Duration::from_millis(10),
            Box::new(move || sender.send(()).unwrap()),
        );
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
