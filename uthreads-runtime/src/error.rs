//! Error types for the uthreads runtime

use thiserror::Error;
use uthreads_common::Tid;

/// Alias for `Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// uthreads runtime errors
///
/// Usage errors are reported before any scheduler state is touched.
/// Infrastructure errors (signal, timer) are fatal once the runtime is up.
#[derive(Error, Debug)]
pub enum Error {
    /// Quantum length was zero or negative
    #[error("quantum must be positive, got {0}us")]
    InvalidQuantum(i64),

    /// Builder settings out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No live thread has this ID
    #[error("no thread with id {0}")]
    InvalidThread(Tid),

    /// Thread table is full
    #[error("thread limit reached ({0} threads)")]
    CapacityExceeded(usize),

    /// Operation is not allowed on or from the main thread
    #[error("the main thread cannot {0}")]
    MainThread(&'static str),

    /// A thread tried to sync on itself
    #[error("thread {0} cannot sync on itself")]
    SelfSync(Tid),

    /// Raw status value outside READY/RUNNING/BLOCKED
    #[error("invalid thread status: {0}")]
    InvalidStatus(u32),

    /// Runtime not initialized
    #[error("runtime not initialized")]
    NotInitialized,

    /// `init` was called twice
    #[error("runtime already initialized")]
    AlreadyInitialized,

    /// Runtime used from an OS thread other than the one that called `init`
    #[error("runtime is owned by another OS thread")]
    ForeignThread,

    /// A voluntary switch found nothing to run
    #[error("no runnable thread left")]
    NoRunnableThread,

    /// Failed to map a thread stack
    #[error("stack allocation failed: {0}")]
    Stack(#[source] std::io::Error),

    /// Failed to install the handler or change the signal mask
    #[error("signal setup failed: {0}")]
    Signal(#[source] std::io::Error),

    /// Failed to arm or disarm the interval timer
    #[error("timer setup failed: {0}")]
    Timer(#[source] std::io::Error),
}

impl Error {
    /// Whether this error leaves the scheduler unable to continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Signal(_) | Error::Timer(_) | Error::NoRunnableThread
        )
    }
}
