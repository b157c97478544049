//! Scheduler metrics in Prometheus text format
//!
//! ## Metrics Exported
//!
//! - `uthreads_switch_total{reason}` - Context switches by reason
//! - `uthreads_idle_ticks_total` - Quanta that expired with nobody waiting
//! - `uthreads_spawned_total` - Threads created
//! - `uthreads_terminated_total` - Threads removed
//! - `uthreads_sync_waits_total` - Sync waits started
//!
//! Counters are plain atomics: they are bumped from the timer signal
//! handler, which must not lock or allocate.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use uthreads_common::SwitchReason;

const REASONS: [SwitchReason; 5] = [
    SwitchReason::Preempted,
    SwitchReason::Yielded,
    SwitchReason::Blocked,
    SwitchReason::Synced,
    SwitchReason::Terminated,
];

/// Metrics collector for the scheduler
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Switches indexed by `SwitchReason as usize - 1`
    switches: [AtomicU64; 5],
    idle_ticks: AtomicU64,
    spawned: AtomicU64,
    terminated: AtomicU64,
    sync_waits: AtomicU64,
}

impl SchedulerMetrics {
    /// Create a new metrics collector
    pub const fn new() -> Self {
        Self {
            switches: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
            idle_ticks: AtomicU64::new(0),
            spawned: AtomicU64::new(0),
            terminated: AtomicU64::new(0),
            sync_waits: AtomicU64::new(0),
        }
    }

    /// Record a context switch
    #[inline]
    pub fn record_switch(&self, reason: SwitchReason) {
        self.switches[reason as usize - 1].fetch_add(1, Ordering::Relaxed);
        if reason == SwitchReason::Synced {
            self.sync_waits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a quantum that expired without a switch
    #[inline]
    pub fn record_idle_tick(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_termination(&self) {
        self.terminated.fetch_add(1, Ordering::Relaxed);
    }

    /// Switches recorded for `reason`
    pub fn switches(&self, reason: SwitchReason) -> u64 {
        self.switches[reason as usize - 1].load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::Relaxed)
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP uthreads_switch_total Context switches by reason\n");
        output.push_str("# TYPE uthreads_switch_total counter\n");
        for reason in REASONS {
            let _ = writeln!(
                output,
                "uthreads_switch_total{{reason=\"{}\"}} {}",
                reason_label(reason),
                self.switches(reason)
            );
        }

        let counters = [
            (
                "uthreads_idle_ticks_total",
                "Quanta that expired with an empty ready queue",
                self.idle_ticks(),
            ),
            ("uthreads_spawned_total", "Threads created", self.spawned()),
            ("uthreads_terminated_total", "Threads terminated", self.terminated()),
            (
                "uthreads_sync_waits_total",
                "Threads that started waiting for another to terminate",
                self.sync_waits.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(output, "{name} {value}");
        }

        output
    }
}

fn reason_label(reason: SwitchReason) -> &'static str {
    match reason {
        SwitchReason::Preempted => "preempted",
        SwitchReason::Yielded => "yielded",
        SwitchReason::Blocked => "blocked",
        SwitchReason::Synced => "synced",
        SwitchReason::Terminated => "terminated",
    }
}

/// Global metrics instance
static METRICS: SchedulerMetrics = SchedulerMetrics::new();

/// Get the global metrics instance
pub fn metrics() -> &'static SchedulerMetrics {
    &METRICS
}
