//! Scheduler state machine
//!
//! [`Scheduler`] owns the thread table, the ready queue, the current thread
//! and the quantum counters. Every operation validates its input first and
//! returns an error without touching any state if the input is bad.
//!
//! Operations that take the CPU away from the running thread do not switch
//! themselves; they return a [`Dispatch`] describing the switch, and the
//! runtime performs it once the scheduler is no longer borrowed.
//!
//! ## Released dependents
//!
//! When a thread terminates, every thread synced on it leaves its sync wait.
//! A released thread becomes READY unless it was also blocked with an
//! explicit `block`, in which case it stays BLOCKED until it is resumed.
//!
//! ## Retired entry points
//!
//! A thread removed before it ever ran still owns its entry closure, and
//! dropping that closure runs user code. Such closures are parked in the
//! scheduler and handed out by [`Scheduler::take_retired`] so the caller can
//! drop them once the scheduler is no longer locked.

use crate::context::{ExecutionContext, SwitchPlan};
use crate::error::{Error, Result};
use crate::ready::ReadyQueue;
use crate::stack::Stack;
use crate::table::ThreadTable;
use crate::thread::{Entry, Thread};
use std::ptr::NonNull;
use uthreads_common::{SwitchReason, ThreadStatus, Tid, MAIN_TID};

/// What the caller must do after a scheduling decision
#[derive(Debug)]
pub enum Dispatch {
    /// Keep running the current thread
    Stay,
    /// Switch to another thread
    Switch(SwitchPlan),
}

impl Dispatch {
    pub fn is_switch(&self) -> bool {
        matches!(self, Dispatch::Switch(_))
    }
}

/// Outcome of [`Scheduler::terminate`]
#[derive(Debug)]
pub enum Termination {
    /// Another thread was removed; the caller keeps running
    Terminated,
    /// The caller removed itself; switch away and never come back
    Switch(SwitchPlan),
    /// The main thread asked to end the process
    Exit,
    /// Another thread ended the process; hand the CPU to the main thread so
    /// it can tear down from its own stack
    Handoff(SwitchPlan),
}

/// Process-wide scheduling state
pub struct Scheduler {
    table: ThreadTable,
    ready: ReadyQueue,
    current: Tid,
    total_quanta: u64,
    stack_size: usize,
    /// Self-terminated threads whose stacks were still in use when they left
    graveyard: Vec<Box<Thread>>,
    /// Entry closures that never ran, waiting to be dropped unlocked
    retired: Vec<Entry>,
    exiting: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("table", &self.table)
            .field("ready", &self.ready)
            .field("current", &self.current)
            .field("total_quanta", &self.total_quanta)
            .field("stack_size", &self.stack_size)
            .field("graveyard", &self.graveyard)
            .field("retired", &self.retired.len())
            .field("exiting", &self.exiting)
            .finish()
    }
}

impl Scheduler {
    /// Scheduler with the calling context as the RUNNING main thread, in the
    /// first quantum
    pub fn new(max_threads: usize, stack_size: usize) -> Self {
        Self {
            table: ThreadTable::new(max_threads, Thread::main()),
            ready: ReadyQueue::with_capacity(max_threads),
            current: MAIN_TID,
            total_quanta: 1,
            stack_size,
            graveyard: Vec::with_capacity(max_threads),
            retired: Vec::new(),
            exiting: false,
        }
    }

    /// ID of the RUNNING thread
    #[inline]
    pub fn current(&self) -> Tid {
        self.current
    }

    /// Quanta started since the scheduler was created, current one included
    #[inline]
    pub fn total_quanta(&self) -> u64 {
        self.total_quanta
    }

    /// Number of live threads
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.table.len()
    }

    /// Table capacity
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.table.capacity()
    }

    /// Quanta `tid` has been RUNNING for
    pub fn quanta(&self, tid: Tid) -> Result<u64> {
        Ok(self.table.lookup(tid)?.quanta())
    }

    pub fn status(&self, tid: Tid) -> Result<ThreadStatus> {
        Ok(self.table.lookup(tid)?.status())
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.table.get(tid)
    }

    /// Ready queue contents, head first
    pub fn ready(&self) -> impl Iterator<Item = Tid> + '_ {
        self.ready.iter()
    }

    /// Whether the main thread has been asked to end the process
    #[inline]
    pub fn exiting(&self) -> bool {
        self.exiting
    }

    /// Terminated threads waiting to have their stacks freed
    #[inline]
    pub fn graveyard_len(&self) -> usize {
        self.graveyard.len()
    }

    /// Create a READY thread at the tail of the ready queue
    pub fn spawn(&mut self, entry: Entry) -> Result<Tid> {
        let reserved = self
            .table
            .allocate()
            .and_then(|tid| Ok((tid, Stack::new(self.stack_size)?)));
        let (tid, stack) = match reserved {
            Ok(reserved) => reserved,
            Err(err) => {
                self.retired.push(entry);
                return Err(err);
            }
        };
        let thread = Thread::spawned(tid, entry, stack);
        self.table.insert(Box::new(thread));
        self.ready.enqueue(tid);
        Ok(tid)
    }

    /// A quantum ended, either by the timer or by a yield.
    ///
    /// The running thread goes to the tail of the ready queue and the head
    /// runs next. With nobody waiting the running thread keeps the CPU; the
    /// global counter still starts a new quantum.
    pub fn tick(&mut self, reason: SwitchReason) -> Dispatch {
        debug_assert!(reason.requeues());
        if self.ready.is_empty() {
            self.total_quanta += 1;
            return Dispatch::Stay;
        }

        let current = self.current;
        let Some(thread) = self.table.get_mut(current) else {
            return Dispatch::Stay;
        };
        thread.set_status(ThreadStatus::Ready);
        let save = thread.context_ptr();
        self.ready.enqueue(current);

        match self.dispatch_next(save) {
            Some(plan) => Dispatch::Switch(plan),
            None => Dispatch::Stay,
        }
    }

    /// Block `tid`. Blocking the running thread switches away from it;
    /// blocking an already BLOCKED thread only records the explicit block.
    pub fn block(&mut self, tid: Tid) -> Result<Dispatch> {
        let thread = self.table.lookup_mut(tid)?;
        if tid.is_main() {
            return Err(Error::MainThread("be blocked"));
        }

        thread.set_blocked_by_self(true);
        match thread.status() {
            ThreadStatus::Running => {
                thread.set_status(ThreadStatus::Blocked);
                let save = thread.context_ptr();
                self.dispatch_next(save)
                    .map(Dispatch::Switch)
                    .ok_or(Error::NoRunnableThread)
            }
            ThreadStatus::Ready => {
                thread.set_status(ThreadStatus::Blocked);
                self.ready.remove(tid);
                Ok(Dispatch::Stay)
            }
            ThreadStatus::Blocked => Ok(Dispatch::Stay),
        }
    }

    /// Lift an explicit block. A thread still in a sync wait stays BLOCKED
    /// until the thread it waits for terminates.
    pub fn resume(&mut self, tid: Tid) -> Result<()> {
        let thread = self.table.lookup_mut(tid)?;
        if thread.status() != ThreadStatus::Blocked {
            return Ok(());
        }

        thread.set_blocked_by_self(false);
        if !thread.is_synced() {
            thread.set_status(ThreadStatus::Ready);
            self.ready.enqueue(tid);
        }
        Ok(())
    }

    /// Block the running thread until `tid` terminates
    pub fn sync(&mut self, tid: Tid) -> Result<Dispatch> {
        let current = self.current;
        if current.is_main() {
            return Err(Error::MainThread("sync"));
        }
        self.table.lookup(tid)?;
        if tid == current {
            return Err(Error::SelfSync(tid));
        }

        self.table.lookup_mut(tid)?.push_dependent(current);

        let thread = self.table.lookup_mut(current)?;
        thread.set_synced_on(Some(tid));
        thread.set_status(ThreadStatus::Blocked);
        let save = thread.context_ptr();
        self.dispatch_next(save)
            .map(Dispatch::Switch)
            .ok_or(Error::NoRunnableThread)
    }

    /// Remove `tid` from every structure and release its dependents
    pub fn terminate(&mut self, tid: Tid) -> Result<Termination> {
        self.table.lookup(tid)?;

        if tid.is_main() {
            return Ok(self.terminate_main());
        }

        if let Some(thread) = self.table.get_mut(tid) {
            let dependents = thread.drain_dependents();
            self.release(tid, dependents);
        }

        let Some(mut thread) = self.table.remove(tid) else {
            return Err(Error::InvalidThread(tid));
        };
        if let Some(entry) = thread.take_entry() {
            self.retired.push(entry);
        }

        if let Some(target) = thread.synced_on() {
            if let Some(awaited) = self.table.get_mut(target) {
                awaited.remove_dependent(tid);
            }
        }

        match thread.status() {
            ThreadStatus::Ready => {
                self.ready.remove(tid);
            }
            ThreadStatus::Running => {
                // Still executing on this stack; free it after the switch
                thread.set_status(ThreadStatus::Blocked);
                self.graveyard.push(thread);
                let save = match self.graveyard.last_mut() {
                    Some(dead) => dead.context_ptr(),
                    None => return Err(Error::NoRunnableThread),
                };
                return self
                    .dispatch_next(save)
                    .map(Termination::Switch)
                    .ok_or(Error::NoRunnableThread);
            }
            ThreadStatus::Blocked => {}
        }

        Ok(Termination::Terminated)
    }

    /// Take the entry closure of the running thread (first dispatch only)
    pub fn take_entry(&mut self) -> Option<Entry> {
        self.table.get_mut(self.current)?.take_entry()
    }

    /// Hand out entry closures of removed threads for dropping
    pub fn take_retired(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.retired)
    }

    /// Free the stacks of self-terminated threads. Must not be called from
    /// the stack of one of them.
    pub fn reap(&mut self) -> usize {
        let reaped = self.graveyard.len();
        self.graveyard.clear();
        reaped
    }

    /// Drop every thread and return how many stacks were freed.
    ///
    /// Runs on the main thread's stack right before the process exits.
    pub fn teardown(&mut self) -> usize {
        self.ready.clear();
        let threads = self.table.drain();
        let stacks = threads.iter().filter(|t| t.has_stack()).count() + self.graveyard.len();
        drop(threads);
        self.graveyard.clear();
        stacks
    }

    fn terminate_main(&mut self) -> Termination {
        self.exiting = true;
        if self.current.is_main() {
            return Termination::Exit;
        }

        // Hand the CPU straight to main, bypassing the queue
        let current = self.current;
        let save = match self.table.get_mut(current) {
            Some(thread) => {
                thread.set_status(ThreadStatus::Blocked);
                thread.context_ptr()
            }
            None => return Termination::Exit,
        };
        self.ready.remove(MAIN_TID);
        let Some(main) = self.table.get_mut(MAIN_TID) else {
            return Termination::Exit;
        };
        main.set_status(ThreadStatus::Running);
        let load = main.context_ptr();
        self.current = MAIN_TID;
        Termination::Handoff(SwitchPlan::new(save, load))
    }

    /// Wake threads whose sync wait on `terminated` just ended
    fn release(&mut self, terminated: Tid, dependents: Vec<Tid>) {
        for tid in dependents {
            let Some(thread) = self.table.get_mut(tid) else {
                continue;
            };
            if thread.synced_on() != Some(terminated) {
                continue;
            }
            thread.set_synced_on(None);
            if !thread.is_blocked_by_self() && thread.status() == ThreadStatus::Blocked {
                thread.set_status(ThreadStatus::Ready);
                self.ready.enqueue(tid);
            }
        }
    }

    /// Move the ready queue head into RUNNING and plan the switch to it.
    ///
    /// This is the one place where a quantum starts with a new thread, so it
    /// is the one place that advances both quantum counters.
    fn dispatch_next(&mut self, save: NonNull<ExecutionContext>) -> Option<SwitchPlan> {
        let next = self.ready.dequeue_front()?;
        let thread = self.table.get_mut(next)?;
        thread.set_status(ThreadStatus::Running);
        thread.increase_quanta();
        let load = thread.context_ptr();

        self.current = next;
        self.total_quanta += 1;
        Some(SwitchPlan::new(save, load))
    }
}
