//! Helpers shared by the scenario binaries.
//!
//! Scenarios run with `harness = false`: the runtime takes over the process
//! main thread and a passing scenario ends by terminating thread 0, which
//! exits with status 0. Checks may run on any user-level thread, so a failed
//! check exits the process instead of panicking.

#![allow(dead_code)]

use std::time::{Duration, Instant};

/// Quantum long enough that no tick lands during a scripted scenario
pub const SCRIPTED_QUANTUM_USECS: i64 = 1_000_000;

/// Exit with status 1 unless `cond` holds
pub fn ensure(cond: bool, what: &str) {
    if !cond {
        eprintln!("check failed: {what}");
        std::process::exit(1);
    }
}

/// Burn CPU on the calling thread until `done` returns true
pub fn spin_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        ensure(Instant::now() < deadline, what);
        std::hint::spin_loop();
    }
}
