//! Integration tests for the ways a `Runtime` runs effects.

use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use fibrant::prelude::*;
use fibrant::runtime::{BlockingError, ConfigError};
use rstest::{fixture, rstest};

#[fixture]
fn runtime() -> Runtime {
    Runtime::default()
}

#[rstest]
fn run_reports_the_exit_through_the_callback(runtime: Runtime) {
    let (sender, receiver) = mpsc::channel();
    let program: IO<&str, i32> = Effect::succeed(20).map(|value| value + 1);

    runtime.run(program, move |exit| {
        let _ = sender.send(exit);
    });

    let exit = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(exit, Exit::Success(21));
}

#[rstest]
fn run_returns_distinct_fiber_ids(runtime: Runtime) {
    let first = runtime.run(Effect::<(), Never, ()>::unit(), |_| {});
    let second = runtime.run(Effect::<(), Never, ()>::unit(), |_| {});
    assert_ne!(first, second);
}

#[rstest]
fn run_fiber_can_be_joined_from_another_program(runtime: Runtime) {
    let fiber = runtime.run_fiber(
        Effect::<(), &str, ()>::sleep(Duration::from_millis(5)).then(Effect::succeed(7)),
    );
    assert_eq!(runtime.run_blocking(fiber.join()), Exit::Success(7));
}

#[rstest]
fn run_fiber_can_be_interrupted(runtime: Runtime) {
    let fiber = runtime.run_fiber(Effect::<(), Never, ()>::never());
    let exit = runtime.run_blocking(fiber.interrupt::<(), Never>());
    let Exit::Success(inner) = exit else {
        panic!("interrupting a fiber should not fail");
    };
    assert!(inner.is_interrupted());
}

#[rstest]
fn fork_root_runs_detached(runtime: Runtime) {
    let promise: Promise<Never, &str> = Promise::new();
    let completer = promise.clone();
    runtime.fork_root(
        Effect::sleep(Duration::from_millis(5)).then(completer.succeed("ran").map(|_| ())),
    );
    assert_eq!(runtime.run_blocking(promise.await_value()), Exit::Success("ran"));
}

#[rstest]
#[case::success(Effect::succeed(1), ExitCode::SUCCESS)]
#[case::interruption(Effect::interrupt(), ExitCode::SUCCESS)]
#[case::failure(Effect::fail("boom"), ExitCode::FAILURE)]
#[case::defect(Effect::die_message("broken"), ExitCode::FAILURE)]
fn run_main_maps_exits_to_codes(
    runtime: Runtime,
    #[case] program: IO<&'static str, i32>,
    #[case] expected: ExitCode,
) {
    assert_eq!(runtime.run_main(program), expected);
}

#[rstest]
fn runtime_keeps_its_configuration() {
    let config = RuntimeConfig::builder()
        .yield_op_count(32)
        .report_unhandled_failures(false)
        .build()
        .unwrap();
    let runtime = Runtime::with_config(config.clone());
    assert_eq!(runtime.config(), &config);
    assert_eq!(runtime.clone().config().yield_op_count(), 32);
}

#[rstest]
fn zero_yield_budget_is_rejected() {
    let error = RuntimeConfig::builder().yield_op_count(0).build().unwrap_err();
    assert!(matches!(
        error,
        ConfigError::InvalidValue {
            field: "yield_op_count",
            ..
        }
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn run_future_inside_tokio() {
    let runtime = Runtime::default();
    let program: IO<&str, i32> = Effect::succeed(2)
        .fork()
        .flat_map(|fiber: Fiber<&str, i32>| fiber.join())
        .map(|value| value * 21);
    assert_eq!(runtime.run_future(program).await, Exit::Success(42));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn run_blocking_inside_a_multi_thread_runtime() {
    let runtime = Runtime::default();
    let exit = runtime.run_blocking(Effect::<(), Never, i32>::succeed(5));
    assert_eq!(exit, Exit::Success(5));
}

#[rstest]
#[tokio::test(flavor = "current_thread")]
async fn try_run_blocking_refuses_a_current_thread_runtime() {
    let runtime = Runtime::default();
    let result = tokio::task::spawn_blocking(move || {
        runtime.try_run_blocking(Effect::<(), Never, i32>::succeed(5))
    })
    .await
    .unwrap();
    assert_eq!(result, Err(BlockingError::CurrentThreadRuntime));
}
