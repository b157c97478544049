//! Critical section guard
//!
//! Critical sections make scheduler mutations atomic with respect to the
//! preemption timer. While inside one:
//! - SIGVTALRM is blocked, so a quantum expiring is held pending
//! - the thread table, ready queue and current thread may be mutated
//!
//! # Design
//!
//! The guard is `!Send` and `!Sync`: the signal mask belongs to the OS thread
//! that blocked it. Guards nest. Each saves the mask it found and restores it
//! unconditionally on drop, including on error paths, so only the outermost
//! drop unblocks the signal.

use crate::error::{Error, Result};
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;

/// Signal used for preemption
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGVTALRM;

thread_local! {
    /// Number of live guards on this OS thread
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII guard for critical sections
///
/// While this guard exists the preemption signal is blocked.
///
/// # Example
///
/// ```rust,no_run
/// use uthreads_runtime::critical::MaskGuard;
///
/// fn mutate_scheduler_state() -> uthreads_runtime::Result<()> {
///     let _guard = MaskGuard::new()?;
///     // no preemption until the guard drops
///     Ok(())
/// }
/// ```
pub struct MaskGuard {
    previous: libc::sigset_t,
    /// *const () is !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl MaskGuard {
    /// Block the preemption signal until the guard is dropped
    pub fn new() -> Result<Self> {
        let set = preempt_set()?;
        let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
        // SAFETY: both pointers reference valid sigset_t storage
        let rc = unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, previous.as_mut_ptr()) };
        if rc != 0 {
            return Err(Error::Signal(std::io::Error::last_os_error()));
        }
        DEPTH.with(|d| d.set(d.get() + 1));

        Ok(Self {
            // SAFETY: sigprocmask filled it on success
            previous: unsafe { previous.assume_init() },
            _marker: PhantomData,
        })
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        // SAFETY: `previous` came from a successful sigprocmask
        let rc = unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut())
        };
        debug_assert_eq!(rc, 0, "restoring the signal mask failed");
    }
}

/// Check if we're currently in a critical section
#[inline]
pub fn in_critical_section() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

/// Current guard nesting depth
#[inline]
pub(crate) fn depth() -> u32 {
    DEPTH.with(|d| d.get())
}

/// Overwrite the guard nesting depth.
///
/// All user-level threads share one OS thread and therefore one counter;
/// each thread puts its own value back when it is switched in.
#[inline]
pub(crate) fn set_depth(depth: u32) {
    DEPTH.with(|d| d.set(depth));
}

/// Whether the preemption signal is blocked on this OS thread right now
pub fn preemption_blocked() -> Result<bool> {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: a null new set only queries the mask
    let rc = unsafe { libc::sigprocmask(libc::SIG_BLOCK, std::ptr::null(), current.as_mut_ptr()) };
    if rc != 0 {
        return Err(Error::Signal(std::io::Error::last_os_error()));
    }
    // SAFETY: filled on success
    let member = unsafe { libc::sigismember(current.as_ptr(), PREEMPT_SIGNAL) };
    Ok(member == 1)
}

/// Unblock the preemption signal outside of any guard.
///
/// A freshly started thread inherits the blocked mask of whoever switched
/// into it; it calls this once before running its entry point.
pub(crate) fn unblock_preemption() -> Result<()> {
    let set = preempt_set()?;
    DEPTH.with(|d| d.set(0));
    // SAFETY: valid set, old mask not requested
    let rc = unsafe { libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(Error::Signal(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Set containing only the preemption signal
pub(crate) fn preempt_set() -> Result<libc::sigset_t> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initializes the set before sigaddset reads it
    unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) != 0
            || libc::sigaddset(set.as_mut_ptr(), PREEMPT_SIGNAL) != 0
        {
            return Err(Error::Signal(std::io::Error::last_os_error()));
        }
        Ok(set.assume_init())
    }
}
