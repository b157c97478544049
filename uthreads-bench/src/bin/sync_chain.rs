//! Sync chain demo
//!
//! Builds a chain of threads where each one waits for the thread spawned
//! before it. Only the tail does real work; everyone else is BLOCKED in
//! `sync` until its predecessor terminates.
//!
//! Expected behavior:
//! - Threads finish strictly in spawn order, tail first
//! - Waiting threads use no quanta while BLOCKED

use clap::Parser;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use uthreads_common::config;
use uthreads_runtime::{self as uthreads, MaskGuard, Tid, MAIN_TID};

/// Sync chain demo
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of threads in the chain
    #[arg(short = 'n', long, default_value_t = 8)]
    length: usize,

    /// Quantum length in microseconds of process CPU time
    #[arg(short, long, default_value_t = 5_000)]
    quantum_usecs: i64,

    /// Iterations of busy work done by the tail
    #[arg(short, long, default_value_t = 50_000_000)]
    work: u64,
}

static FINISHED: AtomicUsize = AtomicUsize::new(0);
static ORDER: [AtomicUsize; config::MAX_THREAD_NUM] =
    [const { AtomicUsize::new(0) }; config::MAX_THREAD_NUM];
static QUANTA_AT_EXIT: [AtomicU64; config::MAX_THREAD_NUM] =
    [const { AtomicU64::new(0) }; config::MAX_THREAD_NUM];

fn finish() {
    let me = uthreads::current_id();
    QUANTA_AT_EXIT[me.index()].store(uthreads::quanta(me).unwrap_or(0), Ordering::SeqCst);
    let pos = FINISHED.fetch_add(1, Ordering::SeqCst);
    ORDER[pos].store(me.index(), Ordering::SeqCst);
}

fn tail(work: u64) -> impl FnOnce() + 'static {
    move || {
        let mut acc = 0u64;
        for i in 0..work {
            acc = acc.wrapping_add(i);
            std::hint::black_box(acc);
        }
        finish();
    }
}

fn link(predecessor: Tid) -> impl FnOnce() + 'static {
    move || {
        // Only fails if the predecessor is already gone
        let _ = uthreads::sync(predecessor);
        finish();
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    let length = args.length.clamp(1, config::MAX_THREAD_NUM - 1);
    tracing::info!("Sync chain demo");
    tracing::info!("  {} threads", length);
    tracing::info!("  {} iterations of tail work", args.work);

    if let Err(err) = uthreads::init(args.quantum_usecs) {
        tracing::error!("init failed: {}", err);
        std::process::exit(1);
    }

    let mut previous = match uthreads::spawn(tail(args.work)) {
        Ok(tid) => tid,
        Err(err) => {
            tracing::error!("spawn failed: {}", err);
            std::process::exit(1);
        }
    };
    for _ in 1..length {
        previous = match uthreads::spawn(link(previous)) {
            Ok(tid) => tid,
            Err(err) => {
                tracing::error!("spawn failed: {}", err);
                std::process::exit(1);
            }
        };
    }

    while FINISHED.load(Ordering::SeqCst) < length {
        if let Err(err) = uthreads::yield_now() {
            tracing::error!("yield failed: {}", err);
            std::process::exit(1);
        }
    }

    {
        let _guard = MaskGuard::new().expect("mask preemption");

        tracing::info!("\n=== Results ===");
        let mut in_order = true;
        for (pos, slot) in ORDER.iter().take(length).enumerate() {
            let tid = slot.load(Ordering::SeqCst);
            in_order &= tid == pos + 1;
            tracing::info!(
                "#{:<2} thread {:>2} ({} quanta)",
                pos + 1,
                tid,
                QUANTA_AT_EXIT[tid].load(Ordering::SeqCst)
            );
        }
        tracing::info!("Total quanta: {}", uthreads::total_quanta());

        if !in_order {
            tracing::warn!("OUT OF ORDER COMPLETION DETECTED");
            std::process::exit(1);
        }
    }

    tracing::info!("Demo complete");
    let _ = uthreads::terminate(MAIN_TID);
}
