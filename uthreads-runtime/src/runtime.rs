//! uthreads runtime builder and entry points
//!
//! The runtime ties the scheduler, the preemption timer and the context
//! switch together. There is one runtime per process, created by [`init`]
//! (or [`Builder::init`]) and torn down when the main thread terminates.
//!
//! Every entry point follows the same discipline: block the preemption
//! signal, lock the runtime, let the scheduler decide, unlock, and only then
//! perform the switch it asked for. The timer signal handler takes the same
//! path with the kernel's own signal mask standing in for the guard.

use crate::context::{Resumed, SwitchPlan};
use crate::critical::{self, MaskGuard};
use crate::error::{Error, Result};
use crate::metrics::metrics;
use crate::scheduler::{Dispatch, Scheduler, Termination};
use crate::timer::{self, PreemptionTimer};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, error, info};
use uthreads_common::{config, SwitchReason, ThreadStatus, Tid, MAIN_TID};

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Length of one quantum of process CPU time
    pub quantum: Duration,

    /// Stack size of every spawned thread
    pub stack_size: usize,

    /// Maximum number of live threads, main included
    pub max_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_micros(config::DEFAULT_QUANTUM_USECS),
            stack_size: config::STACK_SIZE,
            max_threads: config::MAX_THREAD_NUM,
        }
    }
}

impl RuntimeConfig {
    /// Check every setting is in range
    pub fn validate(&self) -> Result<()> {
        if self.quantum.as_micros() == 0 {
            return Err(Error::InvalidConfig(format!(
                "quantum {:?} is shorter than one microsecond",
                self.quantum
            )));
        }
        if self.stack_size < config::MIN_STACK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "stack size {} is below the minimum of {}",
                self.stack_size,
                config::MIN_STACK_SIZE
            )));
        }
        if self.max_threads < 2 {
            return Err(Error::InvalidConfig(format!(
                "max_threads must leave room for one thread besides main, got {}",
                self.max_threads
            )));
        }
        Ok(())
    }
}

/// uthreads runtime builder
pub struct Builder {
    config: RuntimeConfig,
}

impl Builder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the quantum length
    pub fn quantum(mut self, quantum: Duration) -> Self {
        self.config.quantum = quantum;
        self
    }

    /// Set the quantum length in microseconds
    pub fn quantum_usecs(self, usecs: u64) -> Self {
        self.quantum(Duration::from_micros(usecs))
    }

    /// Set the stack size of spawned threads
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    /// Set the maximum number of concurrent threads, main included
    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n;
        self
    }

    /// Get the configuration built so far
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Turn the calling context into the main thread and start the timer
    pub fn init(self) -> Result<()> {
        install(self.config)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide runtime state
struct Runtime {
    scheduler: Scheduler,
    timer: PreemptionTimer,
}

// SAFETY: the runtime is only ever touched from the OS thread that created
// it (checked by `with_runtime`), and from the signal handler, which the
// timer redirects to that same thread.
unsafe impl Send for Runtime {}

/// Global runtime instance
static RUNTIME: Mutex<Option<Runtime>> = Mutex::new(None);

thread_local! {
    /// Whether this OS thread called `init`
    static OWNER: Cell<bool> = const { Cell::new(false) };
}

/// Initialize the runtime with a quantum of `quantum_usecs` microseconds.
///
/// The caller becomes thread 0, the main thread, in its first quantum.
pub fn init(quantum_usecs: i64) -> Result<()> {
    if quantum_usecs <= 0 {
        return Err(Error::InvalidQuantum(quantum_usecs));
    }
    Builder::new().quantum_usecs(quantum_usecs as u64).init()
}

fn install(config: RuntimeConfig) -> Result<()> {
    config.validate()?;

    let _guard = enter();
    let mut slot = RUNTIME.lock();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }

    let scheduler = Scheduler::new(config.max_threads, config.stack_size);
    let timer = match PreemptionTimer::start(config.quantum, on_quantum_expired) {
        Ok(timer) => timer,
        Err(err) => {
            drop(slot);
            fatal(err)
        }
    };
    OWNER.with(|owner| owner.set(true));
    *slot = Some(Runtime { scheduler, timer });

    info!(
        quantum_us = config.quantum.as_micros() as u64,
        stack_size = config.stack_size,
        max_threads = config.max_threads,
        "uthreads runtime initialized"
    );
    Ok(())
}

/// Spawn a thread running `entry`, queued behind every READY thread.
///
/// Returning from `entry` terminates the thread.
pub fn spawn<F>(entry: F) -> Result<Tid>
where
    F: FnOnce() + 'static,
{
    let _guard = enter();
    let tid = with_runtime(|rt| rt.scheduler.spawn(Box::new(entry)))?;
    metrics().record_spawn();
    debug!(%tid, "spawned thread");
    Ok(tid)
}

/// Spawn a thread from a plain function pointer
pub fn spawn_fn(entry: fn()) -> Result<Tid> {
    spawn(entry)
}

/// Terminate `tid` and release every thread synced on it.
///
/// Terminating the calling thread does not return. Terminating the main
/// thread frees every thread and exits the process with status 0.
pub fn terminate(tid: Tid) -> Result<()> {
    let _guard = enter();
    let outcome = with_runtime(|rt| {
        let outcome = rt.scheduler.terminate(tid)?;
        if matches!(outcome, Termination::Switch(_)) {
            rt.timer.rearm()?;
        }
        Ok(outcome)
    });

    match outcome {
        Ok(Termination::Terminated) => {
            metrics().record_termination();
            debug!(%tid, "terminated thread");
            Ok(())
        }
        Ok(Termination::Switch(plan)) => {
            metrics().record_termination();
            debug!(%tid, "thread terminated itself");
            let _ = switch(plan, SwitchReason::Terminated);
            unreachable!("terminated thread {tid} was resumed")
        }
        Ok(Termination::Exit) => shutdown_and_exit(),
        Ok(Termination::Handoff(plan)) => {
            debug!("main thread terminated from another thread, handing off");
            let _ = switch(plan, SwitchReason::Terminated);
            unreachable!("thread resumed after the process began exiting")
        }
        Err(err) if err.is_fatal() => fatal(err),
        Err(err) => Err(err),
    }
}

/// Terminate the calling thread.
///
/// Only returns if the runtime is not initialized.
pub fn exit() -> Result<()> {
    terminate(current_id())
}

/// Block `tid` until it is resumed. Blocking the calling thread switches
/// away immediately; blocking a BLOCKED thread is not an error.
pub fn block(tid: Tid) -> Result<()> {
    let _guard = enter();
    schedule(SwitchReason::Blocked, |s| {
        let dispatch = s.block(tid)?;
        debug!(%tid, "blocked thread");
        Ok(dispatch)
    })
}

/// Move a BLOCKED thread back to READY. Resuming a READY or RUNNING thread
/// has no effect; a thread waiting in `sync` keeps waiting.
pub fn resume(tid: Tid) -> Result<()> {
    let _guard = enter();
    with_runtime(|rt| rt.scheduler.resume(tid))?;
    debug!(%tid, "resumed thread");
    Ok(())
}

/// Block the calling thread until `tid` terminates.
///
/// There is no timeout: waiting on a thread that never terminates waits
/// forever.
pub fn sync(tid: Tid) -> Result<()> {
    let _guard = enter();
    schedule(SwitchReason::Synced, |s| {
        let dispatch = s.sync(tid)?;
        debug!(waiter = %s.current(), target = %tid, "sync wait");
        Ok(dispatch)
    })
}

/// Give up the rest of the current quantum
pub fn yield_now() -> Result<()> {
    let _guard = enter();
    schedule(SwitchReason::Yielded, |s| Ok(s.tick(SwitchReason::Yielded)))
}

/// ID of the calling thread (0 before `init`)
pub fn current_id() -> Tid {
    read(MAIN_TID, |s| s.current())
}

/// Quanta started since `init`, current one included (0 before `init`)
pub fn total_quanta() -> u64 {
    read(0, |s| s.total_quanta())
}

/// Quanta `tid` has spent RUNNING, counting the current one
pub fn quanta(tid: Tid) -> Result<u64> {
    let _guard = enter();
    with_runtime(|rt| rt.scheduler.quanta(tid))
}

/// Status of `tid`
pub fn status(tid: Tid) -> Result<ThreadStatus> {
    let _guard = enter();
    with_runtime(|rt| rt.scheduler.status(tid))
}

/// Number of live threads, main included (0 before `init`)
pub fn thread_count() -> usize {
    read(0, |s| s.thread_count())
}

/// Whether `init` has run
pub fn is_initialized() -> bool {
    let _guard = enter();
    RUNTIME.lock().is_some()
}

/// Block preemption; infrastructure failure here is fatal
fn enter() -> MaskGuard {
    MaskGuard::new().unwrap_or_else(|err| fatal(err))
}

/// Run `f` on the locked runtime. Must be called inside a critical section.
///
/// Also frees the stacks of self-terminated threads: whoever gets here is
/// running on a different stack. Entry closures retired by `f` are dropped
/// after the lock is released, still masked, since their captures may call
/// back into the runtime.
fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> Result<R>) -> Result<R> {
    debug_assert!(critical::in_critical_section());
    let (result, retired) = {
        let mut slot = RUNTIME.lock();
        let rt = slot.as_mut().ok_or(Error::NotInitialized)?;
        if !OWNER.with(Cell::get) {
            return Err(Error::ForeignThread);
        }
        rt.scheduler.reap();
        let result = f(rt);
        (result, rt.scheduler.take_retired())
    };
    drop(retired);
    result
}

/// Observer that falls back to `default` when there is no usable runtime
fn read<R>(default: R, f: impl FnOnce(&Scheduler) -> R) -> R {
    let _guard = enter();
    with_runtime(|rt| Ok(f(&rt.scheduler))).unwrap_or(default)
}

/// Apply a scheduling operation and carry out the switch it decides on
fn schedule(
    reason: SwitchReason,
    op: impl FnOnce(&mut Scheduler) -> Result<Dispatch>,
) -> Result<()> {
    let dispatch = with_runtime(|rt| {
        let dispatch = op(&mut rt.scheduler)?;
        if dispatch.is_switch() {
            rt.timer.rearm()?;
        }
        Ok(dispatch)
    });

    match dispatch {
        Ok(Dispatch::Stay) => Ok(()),
        Ok(Dispatch::Switch(plan)) => {
            let _ = switch(plan, reason);
            Ok(())
        }
        Err(err) if err.is_fatal() => fatal(err),
        Err(err) => Err(err),
    }
}

/// Perform a planned switch; returns once the calling thread is resumed.
///
/// The preemption signal must be blocked and the runtime unlocked.
fn switch(plan: SwitchPlan, reason: SwitchReason) -> Resumed {
    metrics().record_switch(reason);
    let depth = critical::depth();
    // SAFETY: both contexts live in boxed thread control blocks that are
    // freed only by `reap` or `teardown`, neither of which can run before
    // this switch completes. Callers hold the signal blocked.
    let resumed = unsafe { plan.perform() };
    critical::set_depth(depth);
    after_resume();
    resumed
}

/// Bookkeeping for a thread that just got the CPU back
fn after_resume() {
    let exiting = RUNTIME.try_lock().is_some_and(|slot| {
        slot.as_ref()
            .is_some_and(|rt| rt.scheduler.exiting() && rt.scheduler.current().is_main())
    });
    if exiting {
        shutdown_and_exit();
    }
}

/// SIGVTALRM handler: the current quantum is over.
///
/// Runs with SIGVTALRM blocked by the kernel. Nothing here logs or allocates.
extern "C" fn on_quantum_expired(_signal: libc::c_int) {
    if timer::redirect_to_owner() {
        return;
    }

    let plan = {
        let Some(mut slot) = RUNTIME.try_lock() else {
            return;
        };
        let Some(rt) = slot.as_mut() else {
            return;
        };
        if rt.scheduler.exiting() {
            return;
        }
        match rt.scheduler.tick(SwitchReason::Preempted) {
            Dispatch::Stay => {
                metrics().record_idle_tick();
                return;
            }
            Dispatch::Switch(plan) => plan,
        }
    };

    let _ = switch(plan, SwitchReason::Preempted);
}

/// First code a spawned thread runs, on its own stack.
///
/// Entered with the preemption signal blocked by whoever switched here.
pub(crate) extern "C" fn thread_start() -> ! {
    // Reached from a guard or from the signal handler; blocked either way
    critical::set_depth(1);
    let started = with_runtime(|rt| Ok((rt.scheduler.current(), rt.scheduler.take_entry())));
    let (tid, entry) = match started {
        Ok(started) => started,
        Err(err) => fatal(err),
    };
    if let Err(err) = critical::unblock_preemption() {
        fatal(err);
    }

    if let Some(entry) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            error!(%tid, panic = panic_message(payload.as_ref()), "thread panicked, terminating it");
        }
    }

    // Falling off the end of the entry point ends the thread
    match terminate(tid) {
        Ok(()) => fatal(Error::InvalidThread(tid)),
        Err(err) => fatal(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Free every thread and end the process. Runs on the main thread's stack.
fn shutdown_and_exit() -> ! {
    let runtime = RUNTIME.try_lock().and_then(|mut slot| slot.take());
    if let Some(mut rt) = runtime {
        if let Err(err) = rt.timer.stop() {
            error!(%err, "failed to stop the preemption timer");
        }
        let stacks = rt.scheduler.teardown();
        info!(
            stacks,
            total_quanta = rt.scheduler.total_quanta(),
            "main thread terminated, runtime torn down"
        );
    }
    std::process::exit(0)
}

/// Unrecoverable infrastructure failure: stop the timer and exit non-zero
pub(crate) fn fatal(err: Error) -> ! {
    error!(%err, "unrecoverable scheduler failure, exiting");
    if let Some(mut slot) = RUNTIME.try_lock() {
        if let Some(rt) = slot.as_mut() {
            let _ = rt.timer.stop();
        }
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let builder = Builder::new()
            .quantum_usecs(250)
            .stack_size(128 * 1024)
            .max_threads(16);

        assert_eq!(builder.config().quantum, Duration::from_micros(250));
        assert_eq!(builder.config().stack_size, 128 * 1024);
        assert_eq!(builder.config().max_threads, 16);
        assert!(builder.config().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RuntimeConfig::default();
        assert!(config.validate().is_ok());

        config.quantum = Duration::from_nanos(10);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config = RuntimeConfig {
            stack_size: 1024,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config = RuntimeConfig {
            max_threads: 1,
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_init_rejects_non_positive_quantum() {
        assert!(matches!(init(0), Err(Error::InvalidQuantum(0))));
        assert!(matches!(init(-5), Err(Error::InvalidQuantum(-5))));
    }

    #[test]
    fn test_operations_before_init() {
        assert!(matches!(block(Tid(1)), Err(Error::NotInitialized)));
        assert!(matches!(resume(Tid(1)), Err(Error::NotInitialized)));
        assert!(matches!(quanta(MAIN_TID), Err(Error::NotInitialized)));
        assert!(matches!(spawn(|| {}), Err(Error::NotInitialized)));
        assert_eq!(current_id(), MAIN_TID);
        assert_eq!(total_quanta(), 0);
        assert_eq!(thread_count(), 0);
        assert!(!is_initialized());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
