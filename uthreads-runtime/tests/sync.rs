//! Blocking, resuming and waiting for termination.
//!
//! The quantum is long enough that every switch here is a voluntary one, so
//! the interleavings below are exact.

mod common;

use common::{ensure, SCRIPTED_QUANTUM_USECS};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use uthreads_runtime::{self as uthreads, Error, ThreadStatus, Tid, MAIN_TID};

static TARGET: AtomicUsize = AtomicUsize::new(0);
static FLAG: AtomicBool = AtomicBool::new(false);
static WAITER_DONE: AtomicBool = AtomicBool::new(false);
static HITS: AtomicU64 = AtomicU64::new(0);
static PASSED_SYNC: AtomicBool = AtomicBool::new(false);
static SELF_BLOCK_DONE: AtomicBool = AtomicBool::new(false);

fn target() -> Tid {
    Tid(TARGET.load(Ordering::SeqCst))
}

fn waiter() {
    let me = uthreads::current_id();
    ensure(
        matches!(uthreads::sync(me), Err(Error::SelfSync(_))),
        "a thread cannot wait for itself",
    );
    ensure(
        matches!(uthreads::sync(Tid(42)), Err(Error::InvalidThread(_))),
        "waiting for an unknown id fails",
    );

    uthreads::sync(target()).expect("sync");

    ensure(FLAG.load(Ordering::SeqCst), "target ran to completion first");
    ensure(uthreads::status(target()).is_err(), "target no longer exists");
    WAITER_DONE.store(true, Ordering::SeqCst);
}

fn setter() {
    FLAG.store(true, Ordering::SeqCst);
}

fn counter() {
    loop {
        HITS.fetch_add(1, Ordering::SeqCst);
        let _ = uthreads::yield_now();
    }
}

fn spinner() {
    loop {
        let _ = uthreads::yield_now();
    }
}

fn sync_then_mark() {
    uthreads::sync(target()).expect("sync");
    PASSED_SYNC.store(true, Ordering::SeqCst);
}

fn block_self() {
    uthreads::block(uthreads::current_id()).expect("self block");
    SELF_BLOCK_DONE.store(true, Ordering::SeqCst);
}

/// Thread 1 waits for thread 2, which sets a flag and returns
fn sync_releases_waiter() {
    let waiter = uthreads::spawn_fn(waiter).expect("spawn waiter");
    let setter = uthreads::spawn_fn(setter).expect("spawn setter");
    TARGET.store(setter.index(), Ordering::SeqCst);

    while !WAITER_DONE.load(Ordering::SeqCst) {
        uthreads::yield_now().expect("yield");
    }
    ensure(uthreads::status(waiter).is_err(), "waiter terminated after returning");
    ensure(uthreads::thread_count() == 1, "only main is left");
}

/// Explicit block and resume of a READY thread
fn block_and_resume() {
    let tid = uthreads::spawn_fn(counter).expect("spawn counter");
    uthreads::block(tid).expect("block");
    ensure(
        matches!(uthreads::status(tid), Ok(ThreadStatus::Blocked)),
        "blocked thread is BLOCKED",
    );
    uthreads::block(tid).expect("blocking twice is not an error");

    // Nobody else is READY, so the yield comes straight back
    uthreads::yield_now().expect("yield");
    ensure(HITS.load(Ordering::SeqCst) == 0, "blocked thread did not run");

    uthreads::resume(tid).expect("resume");
    uthreads::resume(tid).expect("resuming a READY thread is not an error");
    uthreads::yield_now().expect("yield");
    ensure(HITS.load(Ordering::SeqCst) == 1, "resumed thread ran once");

    uthreads::terminate(tid).expect("terminate counter");
}

/// An explicit block survives the release of a sync wait
fn block_outlives_sync() {
    let waiting = uthreads::spawn_fn(sync_then_mark).expect("spawn waiter");
    let target = uthreads::spawn_fn(spinner).expect("spawn target");
    TARGET.store(target.index(), Ordering::SeqCst);

    // waiter syncs and hands over to target, which yields back to main
    uthreads::yield_now().expect("yield");
    ensure(
        matches!(uthreads::status(waiting), Ok(ThreadStatus::Blocked)),
        "waiter is BLOCKED in sync",
    );

    uthreads::resume(waiting).expect("resume during sync");
    ensure(
        matches!(uthreads::status(waiting), Ok(ThreadStatus::Blocked)),
        "resume does not end a sync wait",
    );

    uthreads::block(waiting).expect("block while synced");
    uthreads::terminate(target).expect("terminate target");
    ensure(
        matches!(uthreads::status(waiting), Ok(ThreadStatus::Blocked)),
        "explicitly blocked waiter stays BLOCKED",
    );
    uthreads::yield_now().expect("yield");
    ensure(!PASSED_SYNC.load(Ordering::SeqCst), "waiter has not run");

    uthreads::resume(waiting).expect("resume");
    uthreads::yield_now().expect("yield");
    ensure(PASSED_SYNC.load(Ordering::SeqCst), "waiter returned from sync");
    ensure(uthreads::status(waiting).is_err(), "waiter finished");
}

/// A thread blocking itself gives up the CPU until resumed
fn self_block() {
    let tid = uthreads::spawn_fn(block_self).expect("spawn");
    uthreads::yield_now().expect("yield");
    ensure(
        matches!(uthreads::status(tid), Ok(ThreadStatus::Blocked)),
        "self-blocked thread is BLOCKED",
    );
    ensure(!SELF_BLOCK_DONE.load(Ordering::SeqCst), "block did not return yet");

    uthreads::resume(tid).expect("resume");
    uthreads::yield_now().expect("yield");
    ensure(SELF_BLOCK_DONE.load(Ordering::SeqCst), "block returned after resume");
}

fn main() {
    uthreads::init(SCRIPTED_QUANTUM_USECS).expect("init");

    ensure(
        matches!(uthreads::block(MAIN_TID), Err(Error::MainThread(_))),
        "main cannot be blocked",
    );
    ensure(
        matches!(uthreads::block(Tid(7)), Err(Error::InvalidThread(_))),
        "block on an unknown id fails",
    );
    ensure(
        matches!(uthreads::resume(Tid(7)), Err(Error::InvalidThread(_))),
        "resume on an unknown id fails",
    );

    sync_releases_waiter();

    let other = uthreads::spawn_fn(spinner).expect("spawn");
    ensure(
        matches!(uthreads::sync(other), Err(Error::MainThread(_))),
        "main cannot sync",
    );
    uthreads::terminate(other).expect("terminate");

    block_and_resume();
    block_outlives_sync();
    self_block();

    ensure(uthreads::thread_count() == 1, "only main is left");
    println!("sync: ok after {} quanta", uthreads::total_quanta());
    let _ = uthreads::terminate(MAIN_TID);
    ensure(false, "terminating main returned");
}
