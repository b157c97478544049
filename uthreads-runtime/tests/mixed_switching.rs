//! Timer preemption interleaved with voluntary yields

mod common;

use common::{ensure, spin_until};
use std::sync::atomic::{AtomicU64, Ordering};
use uthreads_runtime::{self as uthreads, critical, MaskGuard, SwitchReason, MAIN_TID};

const QUANTUM_USECS: i64 = 1_000;
const TARGET_YIELDS: u64 = 100;

static SPINS: AtomicU64 = AtomicU64::new(0);
static YIELDS: AtomicU64 = AtomicU64::new(0);

/// A thread may be preempted or yield anywhere, but user code always runs
/// with the tick deliverable and no guard held
fn ensure_preemptible(what: &str) {
    ensure(!critical::in_critical_section(), what);
    ensure(critical::preemption_blocked().ok() == Some(false), what);
}

/// Never gives up the CPU on its own
fn spinner() {
    loop {
        let n = SPINS.fetch_add(1, Ordering::Relaxed);
        if n % 4096 == 0 {
            ensure_preemptible("spinner resumed with preemption masked");
        }
        std::hint::spin_loop();
    }
}

/// Burns part of a quantum, then yields the rest
fn yielder() {
    loop {
        for _ in 0..10_000 {
            std::hint::spin_loop();
        }
        ensure(uthreads::yield_now().is_ok(), "yield failed");
        ensure_preemptible("yielder resumed with preemption masked");
        YIELDS.fetch_add(1, Ordering::SeqCst);
    }
}

fn main() {
    uthreads::init(QUANTUM_USECS).expect("init");
    let spinning = uthreads::spawn_fn(spinner).expect("spawn");
    let yielding = uthreads::spawn_fn(yielder).expect("spawn");

    // Main never yields either; it only gets the CPU back from the timer
    let start = uthreads::total_quanta();
    spin_until("yielder made progress", || {
        YIELDS.load(Ordering::SeqCst) >= TARGET_YIELDS / 2
    });
    let halfway = uthreads::total_quanta();
    let spins = SPINS.load(Ordering::Relaxed);
    spin_until("yielder kept going", || {
        YIELDS.load(Ordering::SeqCst) >= TARGET_YIELDS
    });
    ensure_preemptible("main resumed with preemption masked");
    ensure(halfway > start, "quanta rose in the first half");
    ensure(uthreads::total_quanta() > halfway, "quanta rose in the second half");
    ensure(SPINS.load(Ordering::Relaxed) > spins, "spinner kept running");

    {
        let _guard = MaskGuard::new().expect("mask");
        let total = uthreads::total_quanta();
        let per_thread: u64 = [MAIN_TID, spinning, yielding]
            .iter()
            .map(|&tid| uthreads::quanta(tid).unwrap_or(0))
            .sum();
        ensure(per_thread == total, "every quantum was charged to one thread");
        ensure(
            uthreads::quanta(yielding).unwrap_or(0) > YIELDS.load(Ordering::SeqCst),
            "each yield was followed by a fresh dispatch",
        );
        ensure(uthreads::quanta(spinning).unwrap_or(0) > 1, "spinner was preempted");
        ensure(uthreads::quanta(MAIN_TID).unwrap_or(0) > 1, "main was preempted");
    }
    ensure_preemptible("guard released the mask");

    let metrics = uthreads::metrics();
    ensure(metrics.switches(SwitchReason::Preempted) > 0, "timer switches recorded");
    ensure(
        metrics.switches(SwitchReason::Yielded) >= TARGET_YIELDS,
        "yield switches recorded",
    );

    println!("mixed_switching: ok after {} quanta", uthreads::total_quanta());
    let _ = uthreads::terminate(MAIN_TID);
    ensure(false, "terminating main returned");
}
