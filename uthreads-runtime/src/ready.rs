//! FIFO ready queue

use std::collections::VecDeque;
use uthreads_common::Tid;

/// Runnable threads waiting for the CPU, oldest first.
///
/// The buffer is sized for the whole thread table up front, so pushing from
/// the timer signal handler never allocates.
#[derive(Debug)]
pub struct ReadyQueue {
    queue: VecDeque<Tid>,
}

impl ReadyQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Append at the tail
    pub fn enqueue(&mut self, tid: Tid) {
        debug_assert!(!self.contains(tid), "thread {tid} queued twice");
        self.queue.push_back(tid);
    }

    /// Take the head
    pub fn dequeue_front(&mut self) -> Option<Tid> {
        self.queue.pop_front()
    }

    /// Remove `tid` wherever it is; returns whether it was queued
    pub fn remove(&mut self, tid: Tid) -> bool {
        match self.queue.iter().position(|&t| t == tid) {
            Some(index) => self.queue.remove(index).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.queue.contains(&tid)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued threads, head first
    pub fn iter(&self) -> impl Iterator<Item = Tid> + '_ {
        self.queue.iter().copied()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
