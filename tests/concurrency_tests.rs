//! Integration tests for racing, parallel composition, timeouts and scopes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use fibrant::prelude::*;
use rstest::{fixture, rstest};

#[fixture]
fn runtime() -> Runtime {
    Runtime::default()
}

fn after(millis: u64, value: i32) -> IO<&'static str, i32> {
    Effect::succeed(value).delay(Duration::from_millis(millis))
}

fn fail_after(millis: u64, error: &'static str) -> IO<&'static str, i32> {
    Effect::fail(error).delay(Duration::from_millis(millis))
}

// =============================================================================
// Sleeping
// =============================================================================

#[rstest]
fn sleep_waits_at_least_the_duration(runtime: Runtime) {
    let started = Instant::now();
    let program: UIO<()> = Effect::sleep(Duration::from_millis(20));
    assert_eq!(runtime.run_blocking(program), Exit::Success(()));
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[rstest]
fn zero_sleep_completes(runtime: Runtime) {
    let program: UIO<i32> = Effect::succeed(3).delay(Duration::ZERO);
    assert_eq!(runtime.run_blocking(program), Exit::Success(3));
}

// =============================================================================
// Racing
// =============================================================================

#[rstest]
#[case(after(5, 1), after(200, 2), 1)]
#[case(after(200, 1), after(5, 2), 2)]
fn race_returns_the_first_success(
    runtime: Runtime,
    #[case] left: IO<&'static str, i32>,
    #[case] right: IO<&'static str, i32>,
    #[case] expected: i32,
) {
    let started = Instant::now();
    assert_eq!(runtime.run_blocking(left.race(right)), Exit::Success(expected));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[rstest]
fn race_ignores_a_failure_when_the_other_side_succeeds(runtime: Runtime) {
    let program = fail_after(1, "fast failure").race(after(20, 7));
    assert_eq!(runtime.run_blocking(program), Exit::Success(7));
}

#[rstest]
fn race_fails_with_both_causes_when_both_fail(runtime: Runtime) {
    let program = fail_after(1, "left").race(fail_after(10, "right"));
    let expected = Cause::fail("left").both(Cause::fail("right"));
    assert_eq!(runtime.run_blocking(program), Exit::Failure(expected));
}

/// An effect that signals `started` and then waits until it is interrupted,
/// setting `flag` when that happens.
fn interruptible_worker(started: &Promise<Never, ()>, flag: &Arc<AtomicBool>) -> IO<&'static str, i32> {
    let flag = Arc::clone(flag);
    started
        .succeed(())
        .then(Effect::never())
        .on_interrupt(Effect::effect_total(move || flag.store(true, Ordering::SeqCst)))
}

#[rstest]
fn race_interrupts_the_loser(runtime: Runtime) {
    let interrupted = Arc::new(AtomicBool::new(false));
    let started = Promise::<Never, ()>::new();
    let loser = interruptible_worker(&started, &interrupted);
    let winner: IO<&str, i32> = started.await_value().widen_error().then(Effect::succeed(1));

    assert_eq!(runtime.run_blocking(winner.race(loser)), Exit::Success(1));
    assert!(interrupted.load(Ordering::SeqCst));
}

#[rstest]
fn race_with_hands_over_the_loser(runtime: Runtime) {
    let program: IO<&str, String> = after(5, 1).race_with(
        Effect::<(), &str, &str>::never(),
        |exit, loser: Fiber<&str, &str>| {
            loser
                .interrupt()
                .map(move |loser_exit| format!("{exit:?} / interrupted: {}", loser_exit.is_interrupted()))
        },
        |_, _| Effect::succeed("right won".to_string()),
    );
    assert_eq!(
        runtime.run_blocking(program),
        Exit::Success("Success(1) / interrupted: true".to_string())
    );
}

// =============================================================================
// Timeouts
// =============================================================================

#[rstest]
fn timeout_returns_none_and_interrupts_the_effect(runtime: Runtime) {
    let interrupted = Arc::new(AtomicBool::new(false));
    let started = Promise::<Never, ()>::new();
    let slow = interruptible_worker(&started, &interrupted);

    let program = slow.timeout(Duration::from_millis(50));
    assert_eq!(runtime.run_blocking(program), Exit::Success(None));
    assert!(interrupted.load(Ordering::SeqCst));
}

#[rstest]
fn timeout_returns_the_value_in_time(runtime: Runtime) {
    let program = after(1, 9).timeout(Duration::from_secs(5));
    assert_eq!(runtime.run_blocking(program), Exit::Success(Some(9)));
}

#[rstest]
fn timeout_keeps_failures(runtime: Runtime) {
    let program = fail_after(1, "failed fast").timeout(Duration::from_secs(5));
    assert_eq!(runtime.run_blocking(program), Exit::fail("failed fast"));
}

// =============================================================================
// Parallel composition
// =============================================================================

#[rstest]
fn zip_par_runs_both_sides_concurrently(runtime: Runtime) {
    let started = Instant::now();
    let program = after(40, 1).zip_par(after(40, 2));
    assert_eq!(runtime.run_blocking(program), Exit::Success((1, 2)));
    assert!(started.elapsed() < Duration::from_millis(80));
}

#[rstest]
fn zip_par_fails_fast_and_interrupts_the_other_side(runtime: Runtime) {
    let interrupted = Arc::new(AtomicBool::new(false));
    let started = Promise::<Never, ()>::new();
    let slow = interruptible_worker(&started, &interrupted);
    let failing: IO<&str, i32> = started.await_value().widen_error().then(Effect::fail("broken"));

    let program = failing.zip_par(slow);
    assert_eq!(runtime.run_blocking(program), Exit::fail("broken"));
    assert!(interrupted.load(Ordering::SeqCst));
}

#[rstest]
fn zip_with_par_combines(runtime: Runtime) {
    let program = after(5, 20).zip_with_par(after(1, 22), |left, right| left + right);
    assert_eq!(runtime.run_blocking(program), Exit::Success(42));
}

#[rstest]
fn collect_all_par_keeps_input_order(runtime: Runtime) {
    let program: IO<&str, Vec<i32>> =
        Effect::collect_all_par([after(30, 1), after(1, 2), after(15, 3)]);
    assert_eq!(runtime.run_blocking(program), Exit::Success(vec![1, 2, 3]));
}

#[rstest]
fn foreach_par_runs_every_item(runtime: Runtime) {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (counter, maximum) = (Arc::clone(&running), Arc::clone(&peak));
    let program: UIO<Vec<usize>> = Effect::foreach_par(0..4, move |index| {
        let (enter, leave, maximum) = (Arc::clone(&counter), Arc::clone(&counter), Arc::clone(&maximum));
        Effect::effect_total(move || {
            let now = enter.fetch_add(1, Ordering::SeqCst) + 1;
            maximum.fetch_max(now, Ordering::SeqCst);
        })
        .then(Effect::sleep(Duration::from_millis(30)))
        .then(Effect::effect_total(move || {
            leave.fetch_sub(1, Ordering::SeqCst);
            index * 10
        }))
    });

    assert_eq!(runtime.run_blocking(program), Exit::Success(vec![0, 10, 20, 30]));
    assert!(peak.load(Ordering::SeqCst) > 1);
}

// =============================================================================
// Scopes
// =============================================================================

#[rstest]
fn scoped_fibers_are_interrupted_when_the_scope_ends(runtime: Runtime) {
    let interrupted = Arc::new(AtomicUsize::new(0));
    let started = Promise::<Never, ()>::new();

    let counter = Arc::clone(&interrupted);
    let signal = started.clone();
    let program: UIO<&str> = Effect::scoped(move |scope: Scope| {
        let worker: UIO<()> = signal
            .succeed(())
            .then(Effect::never())
            .on_interrupt(Effect::effect_total(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        scope
            .fork(worker)
            .flat_map(move |_: Fiber<Never, ()>| started.await_value())
            .as_value("scope body done")
    });

    assert_eq!(runtime.run_blocking(program), Exit::Success("scope body done"));
    assert_eq!(interrupted.load(Ordering::SeqCst), 1);
}

#[rstest]
fn scope_forgets_fibers_that_already_finished(runtime: Runtime) {
    let program: UIO<String> = Effect::scoped(|scope: Scope| {
        let forker = scope.clone();
        let inspected = scope.clone();
        Effect::foreach(0..20, move |index| {
            forker
                .fork(Effect::<(), Never, i32>::succeed(index))
                .flat_map(|fiber: Fiber<Never, i32>| fiber.join())
        })
        .then(Effect::effect_total(move || format!("{inspected:?}")))
    });
    assert_eq!(
        runtime.run_blocking(program),
        Exit::Success("Scope { closed: false, fibers: 1 }".to_string())
    );
}

#[rstest]
fn scoped_fibers_outlive_the_forking_fiber(runtime: Runtime) {
    let program: UIO<i32> = Effect::scoped(|scope: Scope| {
        let inner_scope = scope.clone();
        Effect::unit()
            .flat_map(move |()| inner_scope.fork(after(10, 5).or_else(|| Effect::succeed(0))))
            .fork()
            .flat_map(|forker: Fiber<Never, Fiber<Never, i32>>| forker.join())
            .flat_map(|worker: Fiber<Never, i32>| worker.join())
    });
    assert_eq!(runtime.run_blocking(program), Exit::Success(5));
}
