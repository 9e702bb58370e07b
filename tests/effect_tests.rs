//! Integration tests for sequencing, error handling and resource safety.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fibrant::prelude::*;
use parking_lot::Mutex;
use rstest::{fixture, rstest};

#[fixture]
fn runtime() -> Runtime {
    Runtime::default()
}

// =============================================================================
// Construction and sequencing
// =============================================================================

#[rstest]
fn succeed_produces_value(runtime: Runtime) {
    let program: UIO<i32> = Effect::succeed(42);
    assert_eq!(runtime.run_blocking(program), Exit::Success(42));
}

#[rstest]
fn fail_produces_typed_failure(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::fail("boom");
    assert_eq!(
        runtime.run_blocking(program),
        Exit::Failure(Cause::Fail("boom"))
    );
}

#[rstest]
fn effects_are_lazy(runtime: Runtime) {
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&counter);
    let program: UIO<usize> =
        Effect::effect_total(move || observed.fetch_add(1, Ordering::SeqCst) + 1);

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.run_blocking(program), Exit::Success(1));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[rstest]
fn flat_map_chains_in_order(runtime: Runtime) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&log), Arc::clone(&log));
    let program: UIO<i32> = Effect::effect_total(move || first.lock().push("first"))
        .flat_map(move |()| Effect::effect_total(move || second.lock().push("second")))
        .as_value(7);

    assert_eq!(runtime.run_blocking(program), Exit::Success(7));
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

#[rstest]
fn failure_short_circuits(runtime: Runtime) {
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    let program: IO<&str, ()> = Effect::fail("stop").flat_map(move |()| {
        Effect::effect_total(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        })
    });

    assert_eq!(runtime.run_blocking(program), Exit::fail("stop"));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[rstest]
fn zip_and_zip_with(runtime: Runtime) {
    let zipped: UIO<(i32, &str)> = Effect::succeed(1).zip(Effect::succeed("one"));
    assert_eq!(runtime.run_blocking(zipped), Exit::Success((1, "one")));

    let summed: UIO<i32> = Effect::succeed(2).zip_with(Effect::succeed(3), |a, b| a + b);
    assert_eq!(runtime.run_blocking(summed), Exit::Success(5));

    let left: UIO<i32> = Effect::succeed(1).zip_left(Effect::succeed(2));
    let right: UIO<i32> = Effect::succeed(1).zip_right(Effect::succeed(2));
    assert_eq!(runtime.run_blocking(left), Exit::Success(1));
    assert_eq!(runtime.run_blocking(right), Exit::Success(2));
}

#[rstest]
fn collect_all_keeps_order(runtime: Runtime) {
    let program: UIO<Vec<i32>> = Effect::collect_all((1..=5).map(Effect::succeed));
    assert_eq!(runtime.run_blocking(program), Exit::Success(vec![1, 2, 3, 4, 5]));

    let squares: UIO<Vec<i32>> = Effect::foreach(1..=3, |n| Effect::succeed(n * n));
    assert_eq!(runtime.run_blocking(squares), Exit::Success(vec![1, 4, 9]));
}

#[rstest]
fn from_result_and_absolve(runtime: Runtime) {
    let ok: IO<String, i32> = Effect::from_result(|| "12".parse::<i32>().map_err(|e| e.to_string()));
    assert_eq!(runtime.run_blocking(ok), Exit::Success(12));

    let absolved: IO<&str, i32> = Effect::succeed(Err("nope")).absolve();
    assert_eq!(runtime.run_blocking(absolved), Exit::fail("nope"));
}

// =============================================================================
// Defects
// =============================================================================

#[rstest]
fn panic_in_effect_total_is_a_defect(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::effect_total(|| panic!("kaboom"));
    let exit = runtime.run_blocking(program);

    let cause = exit.cause().expect("expected a failure");
    assert!(cause.died());
    assert!(!cause.failed());
    assert_eq!(cause.defects()[0].message(), "kaboom");
}

#[rstest]
fn panic_in_effect_partial_becomes_typed(runtime: Runtime) {
    let program: IO<String, i32> = Effect::effect_partial(
        || panic!("parse failed"),
        |defect| format!("recovered: {defect}"),
    );
    assert_eq!(
        runtime.run_blocking(program),
        Exit::fail("recovered: parse failed".to_string())
    );
}

#[rstest]
fn panic_in_flat_map_continuation_is_a_defect(runtime: Runtime) {
    let program: UIO<i32> = Effect::succeed(1).map(|_| -> i32 { panic!("in map") });
    let exit = runtime.run_blocking(program);
    assert!(exit.cause().is_some_and(Cause::died));
}

#[rstest]
fn catch_all_does_not_see_defects(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::<(), &str, i32>::die_message("bug")
        .catch_all(|_| Effect::succeed(0));
    let exit = runtime.run_blocking(program);
    assert!(exit.cause().is_some_and(Cause::died));
}

#[rstest]
fn catch_all_defect_recovers(runtime: Runtime) {
    let program: IO<&str, String> = Effect::<(), &str, String>::die_message("bug")
        .catch_all_defect(|defect| Effect::succeed(defect.message().to_string()));
    assert_eq!(runtime.run_blocking(program), Exit::Success("bug".to_string()));
}

// =============================================================================
// Error handling
// =============================================================================

#[rstest]
fn catch_all_recovers_typed_failure(runtime: Runtime) {
    let program: UIO<i32> = Effect::<(), &str, i32>::fail("boom").catch_all(|_| Effect::succeed(0));
    assert_eq!(runtime.run_blocking(program), Exit::Success(0));
}

#[rstest]
#[case::defect(Cause::fail("typed").both(Cause::die_message("defect")), true)]
#[case::interruption(Cause::fail("typed").then(Cause::interrupt(FiberId::from_raw(7))), false)]
fn catch_all_leaves_mixed_causes_alone(
    runtime: Runtime,
    #[case] cause: Cause<&'static str>,
    #[case] died: bool,
) {
    let program: UIO<i32> = Effect::<(), &str, i32>::halt(cause).catch_all(|_| Effect::succeed(7));
    let exit = runtime.run_blocking(program);
    let Some(remaining) = exit.cause() else {
        panic!("a cause with a defect or interruption must not be recovered");
    };
    assert_eq!(remaining.died(), died);
    assert_eq!(remaining.interrupted(), !died);
}

#[rstest]
fn catch_all_cause_sees_everything(runtime: Runtime) {
    let program: UIO<bool> = Effect::<(), &str, bool>::die_message("bug")
        .catch_all_cause(|cause| Effect::succeed(cause.died()));
    assert_eq!(runtime.run_blocking(program), Exit::Success(true));
}

#[rstest]
#[case(Effect::fail("bad"), "failed: bad")]
#[case(Effect::succeed(3), "value: 3")]
fn fold_handles_both_outcomes(runtime: Runtime, #[case] effect: IO<&'static str, i32>, #[case] expected: &str) {
    let program: UIO<String> = effect.fold(
        |error| format!("failed: {error}"),
        |value| format!("value: {value}"),
    );
    assert_eq!(runtime.run_blocking(program), Exit::Success(expected.to_string()));
}

#[rstest]
fn map_err_and_or_else(runtime: Runtime) {
    let mapped: IO<usize, i32> = Effect::<(), &str, i32>::fail("four").map_err(str::len);
    assert_eq!(runtime.run_blocking(mapped), Exit::fail(4));

    let fallback: IO<&str, i32> = Effect::<(), &str, i32>::fail("first").or_else(|| Effect::succeed(2));
    assert_eq!(runtime.run_blocking(fallback), Exit::Success(2));
}

#[rstest]
fn either_and_exit_surface_failures(runtime: Runtime) {
    let either: UIO<Result<i32, &str>> = Effect::<(), &str, i32>::fail("x").either();
    assert_eq!(runtime.run_blocking(either), Exit::Success(Err("x")));

    let exit: UIO<Exit<&str, i32>> = Effect::<(), &str, i32>::succeed(1).exit();
    assert_eq!(runtime.run_blocking(exit), Exit::Success(Exit::Success(1)));
}

#[rstest]
fn or_die_turns_failure_into_defect(runtime: Runtime) {
    let program: UIO<i32> =
        Effect::<(), &str, i32>::fail("fatal").or_die(|error| Defect::new(format!("died: {error}")));
    let exit = runtime.run_blocking(program);
    let cause = exit.cause().expect("expected a failure");
    assert_eq!(cause.defects()[0].message(), "died: fatal");
}

#[rstest]
fn tap_error_keeps_the_failure(runtime: Runtime) {
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let program: IO<&str, i32> = Effect::fail("oops").tap_error(move |error| {
        let error = *error;
        Effect::effect_total(move || *slot.lock() = Some(error))
    });

    assert_eq!(runtime.run_blocking(program), Exit::fail("oops"));
    assert_eq!(*seen.lock(), Some("oops"));
}

// =============================================================================
// Resource safety
// =============================================================================

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> UIO<()> + Clone) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&log);
    let record = move |entry: &str| {
        let writer = Arc::clone(&writer);
        let entry = entry.to_string();
        Effect::effect_total(move || writer.lock().push(entry))
    };
    (log, record)
}

#[rstest]
fn ensuring_runs_on_success_and_failure(runtime: Runtime) {
    let (log, record) = recorder();

    let ok: UIO<i32> = Effect::succeed(1).ensuring(record("after success"));
    assert_eq!(runtime.run_blocking(ok), Exit::Success(1));

    let failed: IO<&str, i32> = Effect::fail("boom").ensuring(record("after failure"));
    assert_eq!(runtime.run_blocking(failed), Exit::fail("boom"));

    assert_eq!(*log.lock(), vec!["after success", "after failure"]);
}

#[rstest]
fn failing_finalizer_is_sequenced_after_the_cause(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::fail("use")
        .ensuring(Effect::die_message("release"));
    let exit = runtime.run_blocking(program);

    let expected = Cause::fail("use").then(Cause::die_message("release"));
    assert_eq!(exit, Exit::Failure(expected));
}

#[rstest]
fn bracket_releases_exactly_once(runtime: Runtime) {
    let (log, record) = recorder();
    let acquire_record = record.clone();
    let program: IO<&str, i32> = Effect::bracket(
        acquire_record("acquire").as_value(5).widen_error(),
        |resource| Effect::fail("use failed").map(move |()| resource),
        move |_| record("release"),
    );

    assert_eq!(runtime.run_blocking(program), Exit::fail("use failed"));
    assert_eq!(*log.lock(), vec!["acquire", "release"]);
}

#[rstest]
fn bracket_exit_sees_the_use_outcome(runtime: Runtime) {
    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let program: IO<&str, i32> = Effect::bracket_exit(
        Effect::succeed(2),
        |resource| Effect::succeed(resource * 10),
        move |_, exit: &Exit<&str, i32>| {
            let exit = exit.clone();
            Effect::effect_total(move || *slot.lock() = Some(exit))
        },
    );

    assert_eq!(runtime.run_blocking(program), Exit::Success(20));
    assert_eq!(*outcome.lock(), Some(Exit::Success(20)));
}

#[rstest]
fn on_error_runs_only_on_failure(runtime: Runtime) {
    let (log, record) = recorder();
    let failing_record = record.clone();

    let ok: IO<&str, i32> = Effect::succeed(1).on_error(move |_| record("ok"));
    let failed: IO<&str, i32> = Effect::fail("x").on_error(move |_| failing_record("failed"));
    assert_eq!(runtime.run_blocking(ok), Exit::Success(1));
    assert_eq!(runtime.run_blocking(failed), Exit::fail("x"));

    assert_eq!(*log.lock(), vec!["failed"]);
}

// =============================================================================
// Introspection
// =============================================================================

#[rstest]
fn descriptor_reports_the_running_fiber(runtime: Runtime) {
    let program: UIO<(FiberId, FiberId)> =
        Effect::fiber_id().zip(Effect::descriptor().map(|descriptor: FiberDescriptor| descriptor.id()));
    let Exit::Success((id, described)) = runtime.run_blocking(program) else {
        panic!("expected success");
    };
    assert_eq!(id, described);
    assert!(!id.is_none());
}

#[rstest]
fn suspend_defers_construction(runtime: Runtime) {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let program: UIO<usize> = Effect::suspend(move || {
        Effect::succeed(counter.fetch_add(1, Ordering::SeqCst))
    });

    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.run_blocking(program), Exit::Success(0));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[rstest]
fn effect_async_resumes_from_another_thread(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::effect_async(|callback| {
        std::thread::spawn(move || callback.succeed(99));
    });
    assert_eq!(runtime.run_blocking(program), Exit::Success(99));
}

#[rstest]
fn effect_async_maybe_completes_synchronously(runtime: Runtime) {
    let program: IO<&str, i32> = Effect::effect_async_maybe(|_callback| Some(Effect::succeed(5)));
    assert_eq!(runtime.run_blocking(program), Exit::Success(5));
}
