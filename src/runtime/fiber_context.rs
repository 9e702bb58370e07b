//! The fiber interpreter.
//!
//! A [`FiberContext`] owns the continuation stack of one fiber and runs its
//! instruction tree in a loop. The loop never recurses into user code, so
//! arbitrarily long `flat_map` chains run in constant native stack.
//!
//! # Suspension
//!
//! An `Async` instruction moves the fiber to `Suspended` with a fresh epoch
//! and hands a [`Resume`] stamped with that epoch to the registration
//! function. Whoever moves the fiber back to `Running` first (the callback,
//! an interruption, or a synchronous result of the registration) bumps the
//! epoch and resubmits the fiber; every later resumption is stale and
//! ignored.
//!
//! # Interruption
//!
//! Requests are recorded in the fiber state and raise an atomic flag. The
//! loop checks the flag at every instruction boundary and, if the current
//! region is interruptible, replaces the next instruction with a failure
//! carrying the interruptors. A suspended interruptible fiber is resumed
//! directly with that failure.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::config::RuntimeConfig;
use super::executor::Executor;
use crate::effect::core::catch_defect;
use crate::effect::instruction::{
    Continuation, Environment, Erased, ErasedCause, ExitHook, FailureHandler, Instruction, erase,
    exit_instruction, unit,
};
use crate::fiber::fiber_ref::FiberRefs;
use crate::fiber::handle::await_done;
use crate::fiber::{Cause, Exit, FiberDescriptor, FiberId, FiberStatus, InterruptStatus};

/// Shared by every fiber started from one [`Runtime`](super::Runtime).
pub(crate) struct Platform {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) config: RuntimeConfig,
}

impl fmt::Debug for Platform {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Platform")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Frames
// =============================================================================

enum Frame {
    Apply(Continuation),
    Fold {
        failure: FailureHandler,
        success: Continuation,
    },
    RestoreInterrupt,
    RestoreEnvironment,
}

/// Interpreter registers. Only touched by the thread currently running the
/// fiber.
struct Interpreter {
    stack: Vec<Frame>,
    interrupt_status: SmallVec<[bool; 8]>,
    environments: SmallVec<[Environment; 4]>,
    fiber_refs: FiberRefs,
    interrupting: bool,
    children_interrupted: bool,
}

impl Interpreter {
    fn new(environment: Environment, fiber_refs: FiberRefs) -> Self {
        let mut environments = SmallVec::new();
        environments.push(environment);
        let mut interrupt_status = SmallVec::new();
        interrupt_status.push(true);
        Self {
            stack: Vec::new(),
            interrupt_status,
            environments,
            fiber_refs,
            interrupting: false,
            children_interrupted: false,
        }
    }

    fn is_interruptible(&self) -> bool {
        self.interrupt_status.last().copied().unwrap_or(true)
    }

    fn environment(&self) -> &Environment {
        // The root environment is never popped.
        &self.environments[self.environments.len() - 1]
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Running,
    Suspended { interruptible: bool },
    Done,
}

type Observer = Box<dyn FnOnce() + Send>;

struct FiberState {
    status: Status,
    epoch: u64,
    interruptors: BTreeSet<FiberId>,
    observers: Vec<Observer>,
    on_exit: Option<ExitHook>,
    final_refs: Option<FiberRefs>,
}

/// Outcome of feeding a value or cause through the continuation stack.
enum Step {
    Continue(Instruction),
    Finished(Exit<Erased, Erased>),
}

// =============================================================================
// FiberContext
// =============================================================================

/// Runtime representation of one fiber.
pub(crate) struct FiberContext {
    id: FiberId,
    platform: Arc<Platform>,
    parent: Option<Weak<FiberContext>>,
    interrupt_requested: AtomicBool,
    state: Mutex<FiberState>,
    interpreter: Mutex<Interpreter>,
    children: Mutex<HashMap<FiberId, Arc<FiberContext>>>,
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FiberContext")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl FiberContext {
    fn new(
        platform: Arc<Platform>,
        parent: Option<Weak<Self>>,
        environment: Environment,
        fiber_refs: FiberRefs,
        on_exit: ExitHook,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::next(),
            platform,
            parent,
            interrupt_requested: AtomicBool::new(false),
            state: Mutex::new(FiberState {
                status: Status::Running,
                epoch: 0,
                interruptors: BTreeSet::new(),
                observers: Vec::new(),
                on_exit: Some(on_exit),
                final_refs: None,
            }),
            interpreter: Mutex::new(Interpreter::new(environment, fiber_refs)),
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a fiber with no parent.
    pub(crate) fn root(
        platform: Arc<Platform>,
        environment: Environment,
        on_exit: ExitHook,
    ) -> Arc<Self> {
        Self::new(platform, None, environment, FiberRefs::default(), on_exit)
    }

    /// Schedules the first run of `instruction` on this fiber.
    pub(crate) fn start(self: &Arc<Self>, instruction: Instruction) {
        trace!(fiber = %self.id, "fiber started");
        self.submit(instruction);
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.platform.executor)
    }

    pub(crate) fn status(&self) -> FiberStatus {
        let state = self.state.lock();
        match state.status {
            Status::Done => FiberStatus::Done,
            _ if self.interrupt_requested.load(Ordering::Acquire) => FiberStatus::Interrupting,
            Status::Running => FiberStatus::Running,
            Status::Suspended { interruptible } => FiberStatus::Suspended { interruptible },
        }
    }

    /// Fiber-local values at the moment the fiber finished.
    pub(crate) fn final_refs(&self) -> Option<FiberRefs> {
        self.state.lock().final_refs.clone()
    }

    /// Registers `observer` to run once the fiber is done.
    ///
    /// Returns `false`, dropping the observer, if the fiber is already done.
    pub(crate) fn add_observer(&self, observer: Observer) -> bool {
        let mut state = self.state.lock();
        if state.status == Status::Done {
            false
        } else {
            state.observers.push(observer);
            true
        }
    }

    /// Requests interruption on behalf of `interruptor`.
    ///
    /// Has no effect on a fiber that is already done.
    pub(crate) fn interrupt_as(self: &Arc<Self>, interruptor: FiberId) {
        let resume = {
            let mut state = self.state.lock();
            if state.status == Status::Done {
                return;
            }
            state.interruptors.insert(interruptor);
            self.interrupt_requested.store(true, Ordering::Release);
            match state.status {
                Status::Suspended {
                    interruptible: true,
                } => {
                    state.status = Status::Running;
                    state.epoch += 1;
                    Some(interruption(&state.interruptors))
                }
                _ => None,
            }
        };
        trace!(fiber = %self.id, by = %interruptor, "interruption requested");
        if let Some(cause) = resume {
            self.submit(Instruction::Fail(cause));
        }
    }

    fn interruption_cause(&self) -> ErasedCause {
        interruption(&self.state.lock().interruptors)
    }

    fn should_interrupt(&self, interpreter: &Interpreter) -> bool {
        interpreter.is_interruptible() && self.interrupt_requested.load(Ordering::Acquire)
    }

    fn submit(self: &Arc<Self>, instruction: Instruction) {
        let fiber = Arc::clone(self);
        self.platform
            .executor
            .submit(Box::new(move || fiber.evaluate(instruction)));
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    fn evaluate(self: &Arc<Self>, instruction: Instruction) {
        let mut interpreter = self.interpreter.lock();
        let yield_op_count = self.platform.config.yield_op_count();
        let mut current = instruction;
        let mut operations = 0usize;

        loop {
            if !interpreter.interrupting && self.should_interrupt(&interpreter) {
                interpreter.interrupting = true;
                let cause = self.interruption_cause();
                current = match current {
                    Instruction::Fail(existing) if existing.interrupted() => {
                        Instruction::Fail(existing)
                    }
                    Instruction::Fail(existing) => Instruction::Fail(existing.then(cause)),
                    _ => Instruction::Fail(cause),
                };
            }

            if operations == yield_op_count {
                trace!(fiber = %self.id, "yielding after {operations} operations");
                drop(interpreter);
                self.submit(current);
                return;
            }
            operations += 1;

            current = match current {
                Instruction::Succeed(value) => {
                    match self.continue_with_value(&mut interpreter, value) {
                        Step::Continue(next) => next,
                        Step::Finished(exit) => match self.complete(&mut interpreter, exit) {
                            Some(next) => next,
                            None => return,
                        },
                    }
                }
                Instruction::Fail(cause) => match self.unwind(&mut interpreter, cause) {
                    Step::Continue(next) => next,
                    Step::Finished(exit) => match self.complete(&mut interpreter, exit) {
                        Some(next) => next,
                        None => return,
                    },
                },
                Instruction::EffectTotal(thunk) => match catch_defect(thunk) {
                    Ok(value) => Instruction::Succeed(value),
                    Err(defect) => Instruction::Fail(Cause::Die(defect)),
                },
                Instruction::EffectPartial { thunk, on_panic } => match catch_defect(thunk) {
                    Ok(value) => Instruction::Succeed(value),
                    Err(defect) => match catch_defect(move || on_panic(defect)) {
                        Ok(error) => Instruction::Fail(Cause::Fail(error)),
                        Err(defect) => Instruction::Fail(Cause::Die(defect)),
                    },
                },
                Instruction::Suspend(factory) => guarded(factory),
                Instruction::FlatMap(effect, continuation) => {
                    interpreter.stack.push(Frame::Apply(continuation));
                    *effect
                }
                Instruction::Fold {
                    effect,
                    failure,
                    success,
                } => {
                    interpreter.stack.push(Frame::Fold { failure, success });
                    *effect
                }
                Instruction::Fork {
                    effect,
                    daemon,
                    on_exit,
                    attach,
                } => {
                    let child = self.fork(&interpreter, daemon, on_exit);
                    let handle = attach(&child);
                    child.start(*effect);
                    Instruction::Succeed(handle)
                }
                Instruction::Async(register) => {
                    let interruptible = interpreter.is_interruptible() && !interpreter.interrupting;
                    let epoch = {
                        let mut state = self.state.lock();
                        if interruptible && !state.interruptors.is_empty() {
                            None
                        } else {
                            state.epoch += 1;
                            state.status = Status::Suspended { interruptible };
                            Some(state.epoch)
                        }
                    };
                    if let Some(epoch) = epoch {
                        trace!(fiber = %self.id, epoch, "fiber suspended");
                        let resume = Resume {
                            fiber: Arc::clone(self),
                            epoch,
                        };
                        let registered = match catch_defect(move || register(resume)) {
                            Ok(immediate) => immediate,
                            Err(defect) => Some(Instruction::Fail(Cause::Die(defect))),
                        };
                        match registered {
                            Some(next) if self.reclaim(epoch) => next,
                            _ => return,
                        }
                    } else {
                        // An interruption arrived after the boundary check.
                        interpreter.interrupting = true;
                        Instruction::Fail(self.interruption_cause())
                    }
                }
                Instruction::InterruptStatus(effect, status) => {
                    interpreter
                        .interrupt_status
                        .push(status.is_interruptible());
                    interpreter.stack.push(Frame::RestoreInterrupt);
                    *effect
                }
                Instruction::CheckInterrupt(function) => {
                    let status = InterruptStatus::from_flag(interpreter.is_interruptible());
                    guarded(move || function(status))
                }
                Instruction::Read(function) => {
                    let environment = Arc::clone(interpreter.environment());
                    guarded(move || function(&environment))
                }
                Instruction::Provide(effect, environment) => {
                    interpreter.environments.push(environment);
                    interpreter.stack.push(Frame::RestoreEnvironment);
                    *effect
                }
                Instruction::Descriptor(function) => {
                    let descriptor = self.descriptor(&interpreter);
                    guarded(move || function(descriptor))
                }
                Instruction::FiberRefs(function) => {
                    let refs = &mut interpreter.fiber_refs;
                    match catch_defect(move || function(refs)) {
                        Ok(value) => Instruction::Succeed(value),
                        Err(defect) => Instruction::Fail(Cause::Die(defect)),
                    }
                }
                Instruction::Yield => {
                    drop(interpreter);
                    self.submit(unit());
                    return;
                }
            };
        }
    }

    /// Pops frames until one accepts `value`.
    fn continue_with_value(&self, interpreter: &mut Interpreter, value: Erased) -> Step {
        while let Some(frame) = interpreter.stack.pop() {
            match frame {
                Frame::Apply(continuation) | Frame::Fold {
                    success: continuation,
                    ..
                } => return Step::Continue(guarded(move || continuation(value))),
                Frame::RestoreInterrupt => {
                    interpreter.interrupt_status.pop();
                    if self.should_interrupt(interpreter) && !interpreter.interrupting {
                        // Let the boundary check inject the latched interruption.
                        return Step::Continue(Instruction::Succeed(value));
                    }
                }
                Frame::RestoreEnvironment => {
                    interpreter.environments.pop();
                }
            }
        }
        Step::Finished(Exit::Success(value))
    }

    /// Pops frames until a failure handler accepts `cause`.
    ///
    /// While the fiber is being interrupted, handlers in interruptible
    /// regions are skipped so that only finalizers run.
    fn unwind(&self, interpreter: &mut Interpreter, cause: ErasedCause) -> Step {
        let mut cause = cause;
        while let Some(frame) = interpreter.stack.pop() {
            match frame {
                Frame::Apply(_) => {}
                Frame::Fold { failure, .. } => {
                    if !self.should_interrupt(interpreter) {
                        // A handled interruption is raised again at the next
                        // interruptible boundary.
                        interpreter.interrupting = false;
                        return Step::Continue(guarded(move || failure(cause)));
                    }
                    cause = self.latch_interruption(interpreter, cause);
                }
                Frame::RestoreInterrupt => {
                    interpreter.interrupt_status.pop();
                }
                Frame::RestoreEnvironment => {
                    interpreter.environments.pop();
                }
            }
        }
        if self.should_interrupt(interpreter) {
            cause = self.latch_interruption(interpreter, cause);
        }
        Step::Finished(Exit::Failure(cause))
    }

    /// Records a pending interruption in a failure that left an
    /// uninterruptible region before the boundary check could see it.
    fn latch_interruption(&self, interpreter: &mut Interpreter, cause: ErasedCause) -> ErasedCause {
        interpreter.interrupting = true;
        if cause.interrupted() {
            cause
        } else {
            trace!(fiber = %self.id, "pending interruption joins a failure");
            cause.then(self.interruption_cause())
        }
    }

    /// Moves a fiber suspended at `epoch` back to running, if nobody else
    /// resumed it first.
    fn reclaim(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        match state.status {
            Status::Suspended { .. } if state.epoch == epoch => {
                state.status = Status::Running;
                state.epoch += 1;
                true
            }
            _ => false,
        }
    }

    fn descriptor(self: &Arc<Self>, interpreter: &Interpreter) -> FiberDescriptor {
        FiberDescriptor {
            id: self.id,
            interrupt_status: InterruptStatus::from_flag(interpreter.is_interruptible()),
            interruptors: self.state.lock().interruptors.clone(),
            children: self.children.lock().len(),
            context: Arc::clone(self),
        }
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    fn fork(self: &Arc<Self>, interpreter: &Interpreter, daemon: bool, on_exit: ExitHook) -> Arc<Self> {
        let parent = if daemon {
            None
        } else {
            Some(Arc::downgrade(self))
        };
        let child = Self::new(
            Arc::clone(&self.platform),
            parent,
            Arc::clone(interpreter.environment()),
            interpreter.fiber_refs.forked(),
            on_exit,
        );
        if !daemon {
            self.children
                .lock()
                .insert(child.id, Arc::clone(&child));
        }
        trace!(parent = %self.id, child = %child.id, daemon, "fiber forked");
        child
    }

    /// Handles the end of the instruction tree.
    ///
    /// An interrupted fiber first interrupts and awaits its live children,
    /// uninterruptibly, and only then finishes with its original exit.
    fn complete(
        self: &Arc<Self>,
        interpreter: &mut Interpreter,
        exit: Exit<Erased, Erased>,
    ) -> Option<Instruction> {
        if exit.is_interrupted() && !interpreter.children_interrupted {
            interpreter.children_interrupted = true;
            let children: Vec<Arc<Self>> = self.children.lock().values().cloned().collect();
            if !children.is_empty() {
                debug!(
                    fiber = %self.id,
                    children = children.len(),
                    "interrupting children of interrupted fiber"
                );
                interpreter.interrupt_status.push(false);
                return Some(interrupt_children(self.id, children, exit));
            }
        }
        self.finish(exit, interpreter.fiber_refs.clone());
        None
    }

    fn finish(&self, exit: Exit<Erased, Erased>, fiber_refs: FiberRefs) {
        let interrupted_only = exit.cause().is_some_and(Cause::interrupted_only);
        let report = exit.cause().filter(|cause| !cause.interrupted_only()).map(|cause| {
            (
                cause.failures().len(),
                cause
                    .defects()
                    .iter()
                    .map(|defect| defect.message().to_owned())
                    .collect::<Vec<_>>(),
            )
        });
        let success = exit.is_success();

        let on_exit = {
            let mut state = self.state.lock();
            state.status = Status::Done;
            state.final_refs = Some(fiber_refs);
            state.on_exit.take()
        };
        let observed = on_exit.is_some_and(|hook| hook(exit));

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.children.lock().remove(&self.id);
        }
        let observers = std::mem::take(&mut self.state.lock().observers);
        for observer in observers {
            observer();
        }

        trace!(fiber = %self.id, success, interrupted = interrupted_only, "fiber done");
        if let Some((failures, defects)) = report
            && !observed
            && self.platform.config.report_unhandled_failures()
        {
            warn!(
                fiber = %self.id,
                failures,
                ?defects,
                "fiber failed with no joiner waiting; a later join still sees the failure"
            );
        }
    }
}

fn interruption(interruptors: &BTreeSet<FiberId>) -> ErasedCause {
    interruptors
        .iter()
        .fold(Cause::Empty, |cause, fiber_id| {
            cause.both(Cause::Interrupt(*fiber_id))
        })
}

/// Runs user code that builds the next instruction, turning a panic into a
/// defect.
fn guarded(function: impl FnOnce() -> Instruction) -> Instruction {
    catch_defect(function).unwrap_or_else(|defect| Instruction::Fail(Cause::Die(defect)))
}

/// Interrupts every child, waits for all of them, then reproduces `exit`.
fn interrupt_children(
    parent: FiberId,
    children: Vec<Arc<FiberContext>>,
    exit: Exit<Erased, Erased>,
) -> Instruction {
    let to_interrupt = children.clone();
    let interrupt_all = Instruction::EffectTotal(Box::new(move || {
        for child in &to_interrupt {
            child.interrupt_as(parent);
        }
        erase(())
    }));
    let awaited = children.into_iter().fold(interrupt_all, |previous, child| {
        Instruction::FlatMap(Box::new(previous), Box::new(move |_| await_done(child)))
    });
    Instruction::FlatMap(Box::new(awaited), Box::new(move |_| exit_instruction(exit)))
}

// =============================================================================
// Resume
// =============================================================================

/// One-shot resumption of a suspended fiber.
pub(crate) struct Resume {
    fiber: Arc<FiberContext>,
    epoch: u64,
}

impl Resume {
    /// Continues the fiber with `instruction`, unless it was already resumed.
    pub(crate) fn resume(self, instruction: Instruction) {
        if self.fiber.reclaim(self.epoch) {
            trace!(fiber = %self.fiber.id, epoch = self.epoch, "fiber resumed");
            self.fiber.submit(instruction);
        }
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Resume")
            .field("fiber", &self.fiber.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}
