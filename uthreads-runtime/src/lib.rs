//! # uthreads Runtime
//!
//! Preemptive user-level threads for a single OS thread.
//!
//! Threads are multiplexed round-robin over the OS thread that calls
//! [`init`]. A virtual interval timer (`ITIMER_VIRTUAL`) raises SIGVTALRM
//! after every quantum of process CPU time; the handler moves the running
//! thread to the back of the ready queue and switches to the front one.
//!
//! ## Key Components
//!
//! - **Scheduler**: thread table, FIFO ready queue and quantum accounting
//! - **Context switch**: register save/restore between thread stacks
//! - **Preemption timer**: SIGVTALRM every quantum
//! - **Critical section**: block the timer signal while scheduler state changes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use uthreads_runtime::{self as uthreads, MAIN_TID};
//!
//! fn main() -> uthreads::Result<()> {
//!     uthreads::init(10_000)?;
//!
//!     let worker = uthreads::spawn(|| {
//!         for _ in 0..3 {
//!             // preempted whenever its quantum runs out
//!         }
//!     })?;
//!
//!     while uthreads::status(worker).is_ok() {
//!         uthreads::yield_now()?;
//!     }
//!
//!     // Frees every thread and exits the process
//!     uthreads::terminate(MAIN_TID)
//! }
//! ```
//!
//! ## Waiting for a thread
//!
//! ```rust,no_run
//! use uthreads_runtime as uthreads;
//!
//! fn waiter(target: uthreads::Tid) {
//!     // BLOCKED until `target` terminates
//!     uthreads::sync(target).ok();
//! }
//! ```
//!
//! ## Non-reentrant code
//!
//! A thread can be preempted between any two instructions, including inside
//! the allocator or while holding a lock another thread wants. Wrap such code
//! in a [`MaskGuard`]; the timer tick is held until the guard drops.
//!
//! ```rust,no_run
//! use uthreads_runtime::MaskGuard;
//!
//! fn build_report() -> uthreads_runtime::Result<String> {
//!     let _guard = MaskGuard::new()?;
//!     Ok(format!("{} threads", uthreads_runtime::thread_count()))
//! }
//! ```

mod arch;

pub mod context;
pub mod critical;
pub mod error;
pub mod metrics;
pub mod ready;
pub mod runtime;
pub mod scheduler;
pub mod stack;
pub mod table;
pub mod thread;
pub mod timer;

pub use critical::MaskGuard;
pub use error::{Error, Result};
pub use metrics::{metrics, SchedulerMetrics};
pub use runtime::{
    block, current_id, exit, init, is_initialized, quanta, resume, spawn, spawn_fn, status,
    sync, terminate, thread_count, total_quanta, yield_now, Builder, RuntimeConfig,
};

/// Re-export common types
pub use uthreads_common::{config, SwitchReason, ThreadStatus, Tid, MAIN_TID};
