//! Property tests for finalization under interruption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fibrant::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_interrupted_bracket_always_releases(
        use_millis in 0u64..4,
        interrupt_millis in 0u64..4,
    ) {
        let runtime = Runtime::default();
        let acquired = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));

        let (on_acquire, on_release) = (Arc::clone(&acquired), Arc::clone(&released));
        let guarded: UIO<()> = Effect::bracket(
            Effect::effect_total(move || on_acquire.store(true, Ordering::SeqCst)),
            move |()| Effect::sleep(Duration::from_millis(use_millis)),
            move |()| Effect::effect_total(move || on_release.store(true, Ordering::SeqCst)),
        );
        let program: UIO<Exit<Never, ()>> = guarded.fork().flat_map(move |fiber: Fiber<Never, ()>| {
            Effect::sleep(Duration::from_millis(interrupt_millis)).then(fiber.interrupt())
        });

        let Exit::Success(exit) = runtime.run_blocking(program) else {
            panic!("interrupting a fiber should not fail");
        };
        prop_assert_eq!(
            acquired.load(Ordering::SeqCst),
            released.load(Ordering::SeqCst)
        );
        prop_assert!(exit.is_success() || exit.is_interrupted());
    }

    #[test]
    fn prop_finalizers_run_in_reverse_order(depth in 1usize..8, interrupt_millis in 0u64..3) {
        let runtime = Runtime::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let innermost: UIO<()> = Effect::never();
        let nested = (0..depth).fold(innermost, |effect, level| {
            let log = Arc::clone(&order);
            effect.ensuring(Effect::effect_total(move || log.lock().push(level)))
        });
        let program: UIO<Exit<Never, ()>> = nested.fork().flat_map(move |fiber: Fiber<Never, ()>| {
            Effect::sleep(Duration::from_millis(interrupt_millis)).then(fiber.interrupt())
        });

        let Exit::Success(exit) = runtime.run_blocking(program) else {
            panic!("interrupting a fiber should not fail");
        };
        prop_assert!(exit.is_interrupted());

        // Outer finalizers are registered first, so whatever ran is a
        // contiguous run of levels ending at the outermost one.
        let entries = order.lock().clone();
        let expected: Vec<usize> = (depth - entries.len()..depth).collect();
        prop_assert_eq!(entries, expected);
    }
}
