//! Round-robin fairness demo
//!
//! Spawns CPU-bound threads that never yield and reports how the virtual
//! timer shared the quanta out between them.
//!
//! Expected behavior:
//! - Every thread, main included, receives a quantum in turn
//! - Per-thread quanta differ by at most one round

use clap::Parser;
use std::sync::atomic::{AtomicU64, Ordering};
use uthreads_common::config;
use uthreads_runtime::{self as uthreads, MaskGuard, Tid, MAIN_TID};

/// Round-robin fairness demo
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of CPU-bound threads besides main
    #[arg(short = 'n', long, default_value_t = 4)]
    threads: usize,

    /// Quantum length in microseconds of process CPU time
    #[arg(short, long, default_value_t = 10_000)]
    quantum_usecs: i64,

    /// Stop once this many quanta have started
    #[arg(short = 't', long, default_value_t = 200)]
    total_quanta: u64,
}

static WORK: [AtomicU64; config::MAX_THREAD_NUM] =
    [const { AtomicU64::new(0) }; config::MAX_THREAD_NUM];

fn busy(slot: usize) -> impl FnOnce() + 'static {
    move || loop {
        WORK[slot].fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    let threads = args.threads.clamp(1, config::MAX_THREAD_NUM - 1);
    tracing::info!("Round-robin fairness demo");
    tracing::info!("  {} threads besides main", threads);
    tracing::info!("  {}µs quantum", args.quantum_usecs);

    if let Err(err) = uthreads::init(args.quantum_usecs) {
        tracing::error!("init failed: {}", err);
        std::process::exit(1);
    }

    let mut tids: Vec<Tid> = vec![MAIN_TID];
    for slot in 1..=threads {
        match uthreads::spawn(busy(slot)) {
            Ok(tid) => tids.push(tid),
            Err(err) => {
                tracing::error!("spawn failed: {}", err);
                std::process::exit(1);
            }
        }
    }

    // Main keeps its own counter and is preempted like everyone else
    while uthreads::total_quanta() < args.total_quanta {
        WORK[0].fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
    }

    {
        // Logging allocates; keep the tick away while reporting
        let _guard = MaskGuard::new().expect("mask preemption");

        tracing::info!("\n=== Results ===");
        tracing::info!("Total quanta: {}", uthreads::total_quanta());
        let mut shares = Vec::with_capacity(tids.len());
        for &tid in &tids {
            let quanta = uthreads::quanta(tid).unwrap_or(0);
            shares.push(quanta);
            tracing::info!(
                "Thread {:>2}: {:>5} quanta, {:>12} iterations",
                tid,
                quanta,
                WORK[tid.index()].load(Ordering::Relaxed)
            );
        }

        let spread = shares.iter().max().unwrap_or(&0) - shares.iter().min().unwrap_or(&0);
        tracing::info!("Quanta spread: {}", spread);
        if spread > 1 {
            tracing::warn!("UNEVEN SHARE DETECTED - round robin is not fair");
        }

        print!("{}", uthreads::metrics().render());
    }

    tracing::info!("Demo complete");
    let _ = uthreads::terminate(MAIN_TID);
}
