//! Execution contexts and the context switch engine
//!
//! An [`ExecutionContext`] is an opaque snapshot of the registers a
//! suspended thread needs to continue: stack pointer, resume address and the
//! callee-saved register file. The rest of the runtime never looks inside it.
//!
//! # Design
//!
//! Saving and restoring are a single operation, [`SwitchPlan::perform`]. The
//! call saves the running thread and loads the target; it "returns" in the
//! saving thread only once some later switch loads that thread again, handing
//! back a [`Resumed`] marker. A thread that has never run has no suspension
//! point to return to, so its first load enters the thread trampoline at the
//! top of its fresh stack instead.
//!
//! The signal mask is not part of the context. Every switch happens with the
//! preemption signal blocked, and each resumed thread restores its own mask
//! on the way out (guard drop, signal return, or the trampoline).

use crate::arch::{self, Registers};
use std::ptr::NonNull;

/// Saved CPU state of a thread that is not running
#[repr(C)]
#[derive(Debug, Default)]
pub struct ExecutionContext {
    regs: Registers,
}

impl ExecutionContext {
    /// Context that will be filled by the first switch away from its thread.
    ///
    /// Used for the main thread, which is already running on the process
    /// stack when the runtime starts.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context whose first resumption calls `entry` on a new stack.
    ///
    /// # Safety
    /// `stack_top` must be the exclusive upper end of a writable stack that
    /// outlives every switch into this context.
    pub unsafe fn fresh(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Self {
        Self {
            // SAFETY: forwarded from the caller
            regs: unsafe { Registers::fresh(stack_top, entry) },
        }
    }
}

/// Proof that a suspended thread was loaded again.
///
/// Only [`SwitchPlan::perform`] creates one, and only on the resuming side.
#[must_use = "a resumed thread must finish its post-switch bookkeeping"]
#[derive(Debug)]
pub struct Resumed {
    _private: (),
}

/// A pending transfer of the CPU from one context to another.
///
/// Produced by the scheduler while it holds its state and performed after the
/// state is released, so the incoming thread never finds it locked.
#[derive(Debug)]
pub struct SwitchPlan {
    save: NonNull<ExecutionContext>,
    load: NonNull<ExecutionContext>,
}

impl SwitchPlan {
    pub(crate) fn new(save: NonNull<ExecutionContext>, load: NonNull<ExecutionContext>) -> Self {
        Self { save, load }
    }

    /// Whether the plan would switch a context onto itself
    pub fn is_noop(&self) -> bool {
        self.save == self.load
    }

    /// Suspend the running thread into `save` and continue `load`.
    ///
    /// # Safety
    /// Both contexts must stay allocated until the switch away from `load`
    /// completes, `load` must hold a valid saved or fresh context, and the
    /// preemption signal must be blocked.
    pub unsafe fn perform(self) -> Resumed {
        if !self.is_noop() {
            // SAFETY: the caller upholds the liveness and validity contract
            unsafe {
                arch::uthreads_switch_context(
                    self.save.as_ptr().cast::<Registers>(),
                    self.load.as_ptr().cast::<Registers>().cast_const(),
                );
            }
        }
        Resumed { _private: () }
    }
}
