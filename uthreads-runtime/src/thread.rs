//! Thread control blocks
//!
//! A [`Thread`] holds everything the scheduler knows about one user-level
//! thread: its identity and status, its stack and saved context, the
//! threads waiting for it to terminate, and its quantum count.

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::stack::Stack;
use std::collections::VecDeque;
use std::fmt;
use std::ptr::NonNull;
use uthreads_common::{ThreadStatus, Tid, MAIN_TID};

/// Entry point of a spawned thread
pub type Entry = Box<dyn FnOnce() + 'static>;

/// Thread control block
pub struct Thread {
    id: Tid,
    status: ThreadStatus,
    /// `None` for the main thread, which runs on the process stack
    stack: Option<Stack>,
    context: ExecutionContext,
    /// Threads blocked in `sync` on this one, in arrival order
    dependents: VecDeque<Tid>,
    quanta: u64,
    /// Blocked by an explicit `block`, independent of any sync wait
    blocked_by_self: bool,
    /// The thread this one is waiting for, while in a sync wait
    synced_on: Option<Tid>,
    /// Taken by the trampoline on first dispatch
    entry: Option<Entry>,
}

impl Thread {
    /// The bootstrap thread: already RUNNING, in its first quantum
    pub fn main() -> Self {
        Self {
            id: MAIN_TID,
            status: ThreadStatus::Running,
            stack: None,
            context: ExecutionContext::empty(),
            dependents: VecDeque::new(),
            quanta: 1,
            blocked_by_self: false,
            synced_on: None,
            entry: None,
        }
    }

    /// A READY thread whose first dispatch runs `entry` on a fresh stack
    pub fn spawned(id: Tid, entry: Entry, stack: Stack) -> Self {
        // SAFETY: the stack is owned by this thread and dropped only after
        // the thread has been switched away from for the last time
        let context = unsafe { ExecutionContext::fresh(stack.top(), crate::runtime::thread_start) };

        Self {
            id,
            status: ThreadStatus::Ready,
            stack: Some(stack),
            context,
            dependents: VecDeque::new(),
            quanta: 0,
            blocked_by_self: false,
            synced_on: None,
            entry: Some(entry),
        }
    }

    /// Thread ID
    #[inline]
    pub fn id(&self) -> Tid {
        self.id
    }

    /// Current status
    #[inline]
    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Set the status
    #[inline]
    pub fn set_status(&mut self, status: ThreadStatus) {
        self.status = status;
    }

    /// Set the status from its raw encoding, rejecting unknown values
    pub fn set_status_raw(&mut self, raw: u32) -> Result<()> {
        let status = ThreadStatus::try_from(raw).map_err(|()| Error::InvalidStatus(raw))?;
        self.status = status;
        Ok(())
    }

    /// Number of quanta this thread has started in RUNNING state
    #[inline]
    pub fn quanta(&self) -> u64 {
        self.quanta
    }

    /// Count one more dispatch into RUNNING
    #[inline]
    pub fn increase_quanta(&mut self) {
        self.quanta += 1;
    }

    /// Register `tid` as waiting for this thread to terminate
    pub fn push_dependent(&mut self, tid: Tid) {
        self.dependents.push_back(tid);
    }

    /// Oldest waiting thread, if any
    pub fn pop_dependent(&mut self) -> Option<Tid> {
        self.dependents.pop_front()
    }

    /// Stop waiting on behalf of `tid` (it terminated while waiting)
    pub fn remove_dependent(&mut self, tid: Tid) -> bool {
        match self.dependents.iter().position(|&d| d == tid) {
            Some(index) => self.dependents.remove(index).is_some(),
            None => false,
        }
    }

    /// Waiting threads in release order
    pub fn dependents(&self) -> impl Iterator<Item = Tid> + '_ {
        self.dependents.iter().copied()
    }

    /// Number of threads synced on this one
    #[inline]
    pub fn dependents_len(&self) -> usize {
        self.dependents.len()
    }

    /// Move every waiting thread out, in release order
    pub fn drain_dependents(&mut self) -> Vec<Tid> {
        self.dependents.drain(..).collect()
    }

    #[inline]
    pub fn is_blocked_by_self(&self) -> bool {
        self.blocked_by_self
    }

    #[inline]
    pub fn set_blocked_by_self(&mut self, flag: bool) {
        self.blocked_by_self = flag;
    }

    /// Whether this thread is in a sync wait
    #[inline]
    pub fn is_synced(&self) -> bool {
        self.synced_on.is_some()
    }

    /// The thread this one waits for
    #[inline]
    pub fn synced_on(&self) -> Option<Tid> {
        self.synced_on
    }

    #[inline]
    pub fn set_synced_on(&mut self, target: Option<Tid>) {
        self.synced_on = target;
    }

    /// Whether this thread has its own stack (every thread but main)
    #[inline]
    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    /// Take the entry closure; `None` once the thread has started
    pub fn take_entry(&mut self) -> Option<Entry> {
        self.entry.take()
    }

    /// Stable pointer to the saved context.
    ///
    /// Threads live boxed in the table, so the pointer stays valid until the
    /// box is dropped.
    pub(crate) fn context_ptr(&mut self) -> NonNull<ExecutionContext> {
        NonNull::from(&mut self.context)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("quanta", &self.quanta)
            .field("dependents", &self.dependents)
            .field("blocked_by_self", &self.blocked_by_self)
            .field("synced_on", &self.synced_on)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uthreads_common::config::MIN_STACK_SIZE;

    fn spawned(id: usize) -> Thread {
        Thread::spawned(Tid(id), Box::new(|| {}), Stack::new(MIN_STACK_SIZE).unwrap())
    }

    #[test]
    fn test_main_thread_starts_running() {
        let main = Thread::main();
        assert_eq!(main.id(), MAIN_TID);
        assert_eq!(main.status(), ThreadStatus::Running);
        assert_eq!(main.quanta(), 1);
        assert!(!main.has_stack());
    }

    #[test]
    fn test_spawned_thread_starts_ready() {
        let mut thread = spawned(4);
        assert_eq!(thread.id(), Tid(4));
        assert_eq!(thread.status(), ThreadStatus::Ready);
        assert_eq!(thread.quanta(), 0);
        assert!(thread.has_stack());
        assert!(thread.take_entry().is_some());
        assert!(thread.take_entry().is_none());
    }

    #[test]
    fn test_set_status_rejects_unknown_values() {
        let mut thread = spawned(1);
        assert!(thread.set_status_raw(3).is_ok());
        assert_eq!(thread.status(), ThreadStatus::Blocked);

        let err = thread.set_status_raw(9).unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(9)));
        assert_eq!(thread.status(), ThreadStatus::Blocked);
    }

    #[test]
    fn test_dependents_are_fifo() {
        let mut thread = spawned(1);
        thread.push_dependent(Tid(3));
        thread.push_dependent(Tid(2));
        thread.push_dependent(Tid(5));
        assert_eq!(thread.dependents_len(), 3);

        assert!(thread.remove_dependent(Tid(2)));
        assert!(!thread.remove_dependent(Tid(2)));

        assert_eq!(thread.pop_dependent(), Some(Tid(3)));
        assert_eq!(thread.drain_dependents(), vec![Tid(5)]);
        assert_eq!(thread.pop_dependent(), None);
    }

    #[test]
    fn test_quanta_counts_dispatches() {
        let mut thread = spawned(1);
        thread.increase_quanta();
        thread.increase_quanta();
        assert_eq!(thread.quanta(), 2);
    }
}
