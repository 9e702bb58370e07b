//! Integration tests for `Promise`.

use std::time::Duration;

use fibrant::prelude::*;
use rstest::{fixture, rstest};

#[fixture]
fn runtime() -> Runtime {
    Runtime::default()
}

#[rstest]
fn succeed_then_await(runtime: Runtime) {
    let program: UIO<i32> = Promise::<Never, i32>::make().flat_map(|promise: Promise<Never, i32>| {
        promise.succeed(5).then(promise.await_value())
    });
    assert_eq!(runtime.run_blocking(program), Exit::Success(5));
}

#[rstest]
fn only_the_first_completion_counts(runtime: Runtime) {
    let program: UIO<(bool, bool, i32)> =
        Promise::<Never, i32>::make().flat_map(|promise: Promise<Never, i32>| {
            let value = promise.await_value();
            promise
                .succeed(1)
                .zip(promise.succeed(2))
                .zip_with(value, |(first, second), value| (first, second, value))
        });
    assert_eq!(runtime.run_blocking(program), Exit::Success((true, false, 1)));
}

#[rstest]
fn exactly_one_concurrent_completion_wins(runtime: Runtime) {
    const COMPLETERS: usize = 16;

    let program: UIO<(usize, usize)> = Promise::<Never, usize>::make().flat_map(
        |promise: Promise<Never, usize>| {
            let reader = promise.clone();
            Effect::foreach_par(0..COMPLETERS, move |index| promise.succeed(index))
                .map(|results: Vec<bool>| results.into_iter().filter(|won| *won).count())
                .zip(reader.await_value())
        },
    );

    let Exit::Success((winners, value)) = runtime.run_blocking(program) else {
        panic!("expected success");
    };
    assert_eq!(winners, 1);
    assert!(value < COMPLETERS);
}

#[rstest]
fn waiters_resume_when_another_fiber_completes(runtime: Runtime) {
    let program: UIO<Vec<&str>> = Promise::<Never, &str>::make().flat_map(
        |promise: Promise<Never, &str>| {
            let completer = promise.clone();
            let waiters = Effect::collect_all_par((0..3).map(|_| promise.await_value()));
            Effect::<(), Never, ()>::sleep(Duration::from_millis(10))
                .then(completer.succeed("ready"))
                .fork()
                .then(waiters)
        },
    );
    assert_eq!(
        runtime.run_blocking(program),
        Exit::Success(vec!["ready", "ready", "ready"])
    );
}

#[rstest]
fn failures_are_delivered_to_waiters(runtime: Runtime) {
    let program: IO<&str, i32> = Promise::<&str, i32>::make().flat_map(|promise: Promise<&str, i32>| {
        promise.fail("broken").then(promise.await_value())
    });
    assert_eq!(runtime.run_blocking(program), Exit::fail("broken"));
}

#[rstest]
fn die_and_halt_complete_with_the_cause(runtime: Runtime) {
    let died: UIO<Exit<&str, i32>> = Promise::<&str, i32>::make().flat_map(|promise: Promise<&str, i32>| {
        promise
            .die(Defect::new("bug"))
            .then(promise.await_exit())
    });
    let Exit::Success(exit) = runtime.run_blocking(died) else {
        panic!("expected success");
    };
    assert!(exit.cause().is_some_and(Cause::died));

    let halted: UIO<Exit<&str, i32>> = Promise::<&str, i32>::make().flat_map(|promise: Promise<&str, i32>| {
        let cause = Cause::fail("a").both(Cause::fail("b"));
        promise.halt(cause).then(promise.await_exit())
    });
    assert_eq!(
        runtime.run_blocking(halted),
        Exit::Success(Exit::halt(Cause::fail("b").both(Cause::fail("a"))))
    );
}

#[rstest]
fn interrupt_completes_with_the_callers_interruption(runtime: Runtime) {
    let program: UIO<(FiberId, Exit<Never, i32>)> =
        Promise::<Never, i32>::make().flat_map(|promise: Promise<Never, i32>| {
            Effect::fiber_id().zip(promise.interrupt().then(promise.await_exit()))
        });

    let Exit::Success((caller, exit)) = runtime.run_blocking(program) else {
        panic!("expected success");
    };
    let cause = exit.cause().expect("promise should be interrupted");
    assert!(cause.interruptors().contains(&caller));
}

#[rstest]
fn poll_and_is_done(runtime: Runtime) {
    let program: UIO<(Option<Exit<Never, i32>>, bool, Option<Exit<Never, i32>>, bool)> =
        Promise::<Never, i32>::make().flat_map(|promise: Promise<Never, i32>| {
            let before = promise.poll().zip(promise.is_done());
            let after = promise.poll().zip(promise.is_done());
            before
                .zip_left(promise.succeed(3))
                .zip(after)
                .map(|((poll_before, done_before), (poll_after, done_after))| {
                    (poll_before, done_before, poll_after, done_after)
                })
        });
    assert_eq!(
        runtime.run_blocking(program),
        Exit::Success((None, false, Some(Exit::Success(3)), true))
    );
}

#[rstest]
fn complete_runs_the_effect_once(runtime: Runtime) {
    let program: IO<&str, (bool, i32)> =
        Promise::<&str, i32>::make().flat_map(|promise: Promise<&str, i32>| {
            promise
                .complete(Effect::succeed(11))
                .zip(promise.await_value())
        });
    assert_eq!(runtime.run_blocking(program), Exit::Success((true, 11)));
}

#[rstest]
fn interrupted_waiter_leaves_the_promise_pending(runtime: Runtime) {
    let program: UIO<(bool, Option<Exit<Never, i32>>)> =
        Promise::<Never, i32>::make().flat_map(|promise: Promise<Never, i32>| {
            let waiter = promise.await_value();
            let inspected = promise.clone();
            waiter
                .fork()
                .flat_map(|fiber: Fiber<Never, i32>| fiber.interrupt())
                .map(|exit| exit.is_interrupted())
                .zip(inspected.poll())
        });
    assert_eq!(runtime.run_blocking(program), Exit::Success((true, None)));
}
