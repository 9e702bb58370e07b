//! Running effects.
//!
//! A [`Runtime`] turns an [`Effect`] into a root fiber on its
//! [`Executor`] and reports the fiber's [`Exit`] through a callback, a
//! future, or by blocking the calling thread.
//!
//! # Examples
//!
//! ```rust
//! use fibrant::prelude::*;
//!
//! let runtime = Runtime::default();
//! let program: IO<&str, i32> = Effect::succeed(21)
//!     .fork()
//!     .flat_map(|fiber: Fiber<&str, i32>| fiber.join())
//!     .map(|value| value * 2);
//!
//! assert_eq!(runtime.run_blocking(program), Exit::Success(42));
//! ```

mod blocking;
mod config;
pub mod executor;
pub(crate) mod fiber_context;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

pub use blocking::{BlockingError, try_block_on};
pub use config::{ConfigError, DEFAULT_YIELD_OP_COUNT, RuntimeConfig, RuntimeConfigBuilder};
pub use executor::{Executor, Task, TimerHandle, TokioExecutor};

use crate::effect::instruction::{Environment, unerase_exit};
use crate::effect::{Effect, Never};
use crate::fiber::{Cause, Exit, Fiber, FiberId};
use crate::sync::Promise;
use fiber_context::{FiberContext, Platform};

/// Runs effects as root fibers.
///
/// Cloning a runtime is cheap; clones share the executor and configuration.
#[derive(Debug, Clone)]
pub struct Runtime {
    platform: Arc<Platform>,
}

impl Default for Runtime {
    /// A runtime on [`TokioExecutor::current`] with the default
    /// configuration.
    fn default() -> Self {
        Self::new(Arc::new(TokioExecutor::current()), RuntimeConfig::default())
    }
}

impl Runtime {
    /// Creates a runtime on `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, config: RuntimeConfig) -> Self {
        Self {
            platform: Arc::new(Platform { executor, config }),
        }
    }

    /// Creates a runtime on [`TokioExecutor::current`] with `config`.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::new(Arc::new(TokioExecutor::current()), config)
    }

    /// Creates a runtime configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an environment variable holds an invalid
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        RuntimeConfig::from_env().map(Self::with_config)
    }

    /// The runtime's configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.platform.config
    }

    /// Starts `effect` on a new root fiber and calls `callback` with its
    /// exit. Returns immediately with the fiber's identifier.
    pub fn run<E, A, F>(&self, effect: Effect<(), E, A>, callback: F) -> FiberId
    where
        E: Send + 'static,
        A: Send + 'static,
        F: FnOnce(Exit<E, A>) + Send + 'static,
    {
        let root = FiberContext::root(
            Arc::clone(&self.platform),
            unit_environment(),
            Box::new(move |exit| {
                callback(unerase_exit(exit));
                true
            }),
        );
        root.start(effect.into_instruction());
        root.id()
    }

    /// Starts `effect` on a new root fiber and returns a handle to it.
    ///
    /// Failures of a root fiber started this way are reported like those
    /// of any other fiber nobody awaits.
    pub fn run_fiber<E, A>(&self, effect: Effect<(), E, A>) -> Fiber<E, A>
    where
        E: Clone + Send + 'static,
        A: Clone + Send + 'static,
    {
        let promise = Promise::new();
        let completion = promise.clone();
        let root = FiberContext::root(
            Arc::clone(&self.platform),
            unit_environment(),
            Box::new(move |exit| completion.complete_now(unerase_exit(exit)).1),
        );
        let fiber = Fiber::new(Arc::clone(&root), promise);
        root.start(effect.into_instruction());
        fiber
    }

    /// Starts `effect` when the returned future is first polled and
    /// resolves with its exit.
    pub fn run_future<E, A>(
        &self,
        effect: Effect<(), E, A>,
    ) -> impl Future<Output = Exit<E, A>> + Send + use<E, A>
    where
        E: Send + 'static,
        A: Send + 'static,
    {
        let runtime = self.clone();
        async move {
            let (sender, receiver) = tokio::sync::oneshot::channel();
            runtime.run(effect, move |exit| {
                let _ = sender.send(exit);
            });
            receiver.await.unwrap_or_else(|_| {
                Exit::halt(Cause::die_message("root fiber ended without reporting an exit"))
            })
        }
    }

    /// Runs `effect` and blocks the calling thread until it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`BlockingError`] when called from a runtime that cannot be
    /// blocked, such as a current-thread tokio runtime.
    pub fn try_run_blocking<E, A>(
        &self,
        effect: Effect<(), E, A>,
    ) -> Result<Exit<E, A>, BlockingError>
    where
        E: Send + 'static,
        A: Send + 'static,
    {
        try_block_on(self.run_future(effect))
    }

    /// Runs `effect` and blocks the calling thread until it finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a current-thread tokio runtime; use
    /// [`Runtime::run_future`] there instead.
    pub fn run_blocking<E, A>(&self, effect: Effect<(), E, A>) -> Exit<E, A>
    where
        E: Send + 'static,
        A: Send + 'static,
    {
        self.try_run_blocking(effect).expect("run_blocking failed")
    }

    /// Runs a program's main effect and maps its exit to a process exit
    /// code.
    ///
    /// Success and interruption alone exit with `0`. Typed failures and
    /// defects are logged and exit with `1`.
    pub fn run_main<E, A>(&self, effect: Effect<(), E, A>) -> ExitCode
    where
        E: std::fmt::Debug + Send + 'static,
        A: Send + 'static,
    {
        match self.try_run_blocking(effect) {
            Ok(Exit::Success(_)) => ExitCode::SUCCESS,
            Ok(Exit::Failure(cause)) if cause.interrupted_only() => {
                info!(interruptors = ?cause.interruptors(), "main fiber interrupted");
                ExitCode::SUCCESS
            }
            Ok(Exit::Failure(cause)) => {
                let failure = Exit::<E, A>::halt(cause).into_result().err();
                if let Some(failure) = failure {
                    error!(%failure, "main fiber failed");
                }
                ExitCode::FAILURE
            }
            Err(blocking) => {
                error!(%blocking, "could not run main fiber");
                ExitCode::FAILURE
            }
        }
    }

    /// Starts `effect` as a detached root fiber, ignoring its result apart
    /// from failure reporting.
    pub fn fork_root(&self, effect: Effect<(), Never, ()>) -> FiberId {
        let root = FiberContext::root(
            Arc::clone(&self.platform),
            unit_environment(),
            Box::new(|_| false),
        );
        root.start(effect.into_instruction());
        root.id()
    }
}

fn unit_environment() -> Environment {
    Arc::new(())
}
