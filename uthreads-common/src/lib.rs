// SPDX-License-Identifier: GPL-2.0-only
// Copyright (C) 2024 Ankit Kumar Pandey <ankitkpandey1@gmail.com>

//! # uthreads-common
//!
//! Shared types for the uthreads runtime and its tooling.
//!
//! This crate holds the vocabulary every other crate speaks: thread
//! identifiers, the thread lifecycle state machine, the reasons a thread
//! leaves the CPU, and the compile-time limits of the runtime.
//!
//! ## Architectural Guardrails (Non-Goals)
//!
//! 1. **No parallelism** - all user threads share one OS thread
//! 2. **No priorities** - the ready queue is strict FIFO
//! 3. **No stack growth** - every stack is fixed at spawn time

#![no_std]

use core::fmt;

// ============================================================================
// Thread identifiers
// ============================================================================

/// Identifier of a user-level thread.
///
/// Ids are table slot indices. They are stable for the lifetime of a thread
/// and are handed out again, lowest first, once the thread terminates.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tid(pub usize);

/// The thread that called `init`. It runs on the process stack and owns
/// slot 0 for the whole life of the runtime.
pub const MAIN_TID: Tid = Tid(0);

impl Tid {
    /// Slot index of this id
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Whether this is the main thread
    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == MAIN_TID.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Tid {
    fn from(value: usize) -> Self {
        Tid(value)
    }
}

// ============================================================================
// Thread lifecycle state machine
// ============================================================================

/// Thread lifecycle state
///
/// State transitions:
/// ```text
///            spawn
///              │
///              ▼
///   ┌────── READY ◄──────────┐
///   │          │             │ resume / sync target terminated
///   │ dispatch │             │
///   │          ▼             │
///   │       RUNNING ──────► BLOCKED
///   │          │   block / sync
///   └──────────┘
///    preempt / yield
/// ```
///
/// Terminated threads leave the table entirely; there is no corpse state.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Runnable and waiting in the ready queue
    Ready = 1,

    /// Owns the CPU
    Running = 2,

    /// Waiting for an explicit resume or for a synced thread to terminate
    Blocked = 3,
}

impl TryFrom<u32> for ThreadStatus {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ThreadStatus::Ready),
            2 => Ok(ThreadStatus::Running),
            3 => Ok(ThreadStatus::Blocked),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadStatus::Ready => "READY",
            ThreadStatus::Running => "RUNNING",
            ThreadStatus::Blocked => "BLOCKED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Switch reasons
// ============================================================================

/// Why the running thread gave up the CPU
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The quantum expired
    Preempted = 1,

    /// The thread yielded the rest of its quantum
    Yielded = 2,

    /// The thread blocked itself
    Blocked = 3,

    /// The thread is waiting for another thread to terminate
    Synced = 4,

    /// The thread terminated itself
    Terminated = 5,
}

impl SwitchReason {
    /// Whether the outgoing thread goes back to the ready queue
    #[inline]
    pub fn requeues(self) -> bool {
        matches!(self, SwitchReason::Preempted | SwitchReason::Yielded)
    }
}

// ============================================================================
// Configuration constants
// ============================================================================

/// Configuration constants
pub mod config {
    /// Maximum number of concurrent threads, main thread included
    pub const MAX_THREAD_NUM: usize = 100;

    /// Stack size of every spawned thread in bytes (64KB)
    pub const STACK_SIZE: usize = 64 * 1024;

    /// Smallest stack size the runtime accepts (16KB)
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Default quantum in microseconds (100ms)
    pub const DEFAULT_QUANTUM_USECS: u64 = 100_000;
}

// ============================================================================
// Tests
// ============================================================================
