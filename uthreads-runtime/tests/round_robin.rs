//! Timer-driven round robin between CPU-bound threads

mod common;

use common::{ensure, spin_until};
use std::sync::atomic::{AtomicU64, Ordering};
use uthreads_runtime::{self as uthreads, Error, MaskGuard, SwitchReason, ThreadStatus, Tid, MAIN_TID};

const QUANTUM_USECS: i64 = 2_000;
const WORKERS: usize = 3;

static COUNTERS: [AtomicU64; WORKERS] = [const { AtomicU64::new(0) }; WORKERS];

fn worker(slot: usize) -> impl FnOnce() + 'static {
    move || loop {
        COUNTERS[slot].fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

fn main() {
    ensure(uthreads::current_id() == MAIN_TID, "current id is 0 before init");
    ensure(uthreads::total_quanta() == 0, "no quanta before init");

    uthreads::init(QUANTUM_USECS).expect("init");
    ensure(uthreads::is_initialized(), "runtime initialized");
    ensure(
        matches!(uthreads::init(QUANTUM_USECS), Err(Error::AlreadyInitialized)),
        "second init is rejected",
    );
    ensure(uthreads::total_quanta() == 1, "init starts the first quantum");
    ensure(uthreads::quanta(MAIN_TID).ok() == Some(1), "main owns the first quantum");

    let tids: Vec<Tid> = (0..WORKERS)
        .map(|slot| uthreads::spawn(worker(slot)))
        .collect::<Result<_, _>>()
        .expect("spawn workers");
    ensure(tids == [Tid(1), Tid(2), Tid(3)], "ids are handed out lowest first");
    ensure(uthreads::thread_count() == WORKERS + 1, "thread count includes main");
    for &tid in &tids {
        ensure(
            matches!(uthreads::status(tid), Ok(ThreadStatus::Ready)),
            "new threads are READY",
        );
        ensure(uthreads::quanta(tid).ok() == Some(0), "new threads have not run");
    }

    // Main never yields: only the timer can hand the CPU to the workers
    spin_until("every worker got the CPU", || {
        COUNTERS.iter().all(|c| c.load(Ordering::Relaxed) > 0)
    });
    let before = uthreads::quanta(MAIN_TID).unwrap_or(0);
    spin_until("main got the CPU back again", || {
        uthreads::quanta(MAIN_TID).unwrap_or(0) > before
    });

    {
        // Hold the tick so the counters are read in one piece
        let _guard = MaskGuard::new().expect("mask");
        let total = uthreads::total_quanta();
        let per_thread: u64 = std::iter::once(MAIN_TID)
            .chain(tids.iter().copied())
            .map(|tid| uthreads::quanta(tid).unwrap_or(0))
            .sum();
        ensure(total > WORKERS as u64 + 1, "several quanta elapsed");
        ensure(per_thread == total, "every quantum was charged to one thread");
        ensure(
            matches!(uthreads::status(MAIN_TID), Ok(ThreadStatus::Running)),
            "main is RUNNING while it executes",
        );
        for &tid in &tids {
            ensure(uthreads::quanta(tid).unwrap_or(0) >= 1, "worker was dispatched");
        }
    }
    ensure(
        uthreads::metrics().switches(SwitchReason::Preempted) > 0,
        "switches were recorded as preemptions",
    );

    // Workers are READY while main runs, so terminating them never switches
    uthreads::terminate(tids[1]).expect("terminate a queued worker");
    ensure(uthreads::status(tids[1]).is_err(), "terminated id is gone");
    ensure(uthreads::thread_count() == WORKERS, "count dropped by one");

    let frozen = COUNTERS[1].load(Ordering::Relaxed);
    let respawned = uthreads::spawn(|| loop {
        std::hint::spin_loop();
    })
    .expect("respawn");
    ensure(respawned == tids[1], "freed id is reused");

    let progress = COUNTERS[0].load(Ordering::Relaxed);
    spin_until("surviving workers keep running", || {
        COUNTERS[0].load(Ordering::Relaxed) > progress
    });
    ensure(
        COUNTERS[1].load(Ordering::Relaxed) == frozen,
        "terminated worker never runs again",
    );

    println!("round_robin: ok after {} quanta", uthreads::total_quanta());
    let _ = uthreads::terminate(MAIN_TID);
    ensure(false, "terminating main returned");
}
