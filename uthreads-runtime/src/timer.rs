//! Preemption timer
//!
//! A repeating `ITIMER_VIRTUAL` timer raises SIGVTALRM every quantum of
//! process CPU time. The timer only counts while the process is executing,
//! so time spent descheduled by the kernel or sleeping does not use up a
//! thread's quantum.
//!
//! `ITIMER_VIRTUAL` is process-directed: the kernel may deliver the signal to
//! any OS thread that does not block it. The handler forwards strays to the
//! OS thread that owns the runtime.

use crate::critical::{preempt_set, PREEMPT_SIGNAL};
use crate::error::{Error, Result};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// pthread_t of the OS thread running the user-level threads
static OWNER: AtomicUsize = AtomicUsize::new(0);

/// Signal handler signature
pub type Handler = extern "C" fn(libc::c_int);

/// Armed interval timer plus the SIGVTALRM disposition it replaced
pub struct PreemptionTimer {
    interval: libc::itimerval,
    previous: libc::sigaction,
    armed: bool,
}

impl PreemptionTimer {
    /// Install `handler` for SIGVTALRM and start ticking every `quantum`
    pub fn start(quantum: Duration, handler: Handler) -> Result<Self> {
        let interval = itimerval(quantum)?;

        // SAFETY: pthread_self has no preconditions
        OWNER.store(unsafe { libc::pthread_self() } as usize, Ordering::Release);

        // SAFETY: zeroed sigaction is a valid starting point; every field the
        // kernel reads is set below
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        action.sa_mask = preempt_set()?;

        let mut previous = MaybeUninit::<libc::sigaction>::uninit();
        // SAFETY: valid action and output pointers
        if unsafe { libc::sigaction(PREEMPT_SIGNAL, &action, previous.as_mut_ptr()) } != 0 {
            return Err(Error::Signal(std::io::Error::last_os_error()));
        }

        let mut timer = Self {
            interval,
            // SAFETY: filled by the successful sigaction above
            previous: unsafe { previous.assume_init() },
            armed: false,
        };
        timer.rearm()?;
        timer.armed = true;
        Ok(timer)
    }

    /// Restart the countdown so the next thread gets a full quantum
    pub fn rearm(&self) -> Result<()> {
        // SAFETY: valid itimerval, old value not requested
        let rc = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &self.interval, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(Error::Timer(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Disarm the timer and put back the previous SIGVTALRM disposition
    pub fn stop(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;

        // SAFETY: an all-zero itimerval disarms the timer
        let disarm: libc::itimerval = unsafe { std::mem::zeroed() };
        // SAFETY: valid itimerval, old value not requested
        if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &disarm, std::ptr::null_mut()) } != 0 {
            return Err(Error::Timer(std::io::Error::last_os_error()));
        }
        // SAFETY: `previous` was returned by the kernel
        if unsafe { libc::sigaction(PREEMPT_SIGNAL, &self.previous, std::ptr::null_mut()) } != 0 {
            return Err(Error::Signal(std::io::Error::last_os_error()));
        }
        OWNER.store(0, Ordering::Release);
        Ok(())
    }
}

impl Drop for PreemptionTimer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Called first thing in the handler. If the signal landed on a foreign OS
/// thread, re-raise it on the owner and return `true`.
///
/// Only async-signal-safe calls are made here.
pub(crate) fn redirect_to_owner() -> bool {
    let owner = OWNER.load(Ordering::Acquire);
    // SAFETY: pthread_self has no preconditions
    let me = unsafe { libc::pthread_self() } as usize;
    if owner == 0 || owner == me {
        return false;
    }
    // SAFETY: the owner thread outlives the runtime it drives
    unsafe { libc::pthread_kill(owner as libc::pthread_t, PREEMPT_SIGNAL) };
    true
}

/// Split a quantum into the seconds/microseconds pair setitimer wants
fn itimerval(quantum: Duration) -> Result<libc::itimerval> {
    if quantum.is_zero() || quantum.as_micros() == 0 {
        return Err(Error::InvalidConfig(format!(
            "quantum {quantum:?} is shorter than one microsecond"
        )));
    }
    let value = libc::timeval {
        tv_sec: quantum.as_secs() as libc::time_t,
        tv_usec: quantum.subsec_micros() as libc::suseconds_t,
    };
    Ok(libc::itimerval {
        it_interval: value,
        it_value: value,
    })
}
