//! Thread table: fixed-capacity map from thread ID to control block

use crate::error::{Error, Result};
use crate::thread::Thread;
use uthreads_common::{Tid, MAIN_TID};

/// Fixed-capacity slot array. Slot 0 always holds the main thread and a
/// thread's ID is always its slot index.
#[derive(Debug)]
pub struct ThreadTable {
    slots: Vec<Option<Box<Thread>>>,
    len: usize,
}

impl ThreadTable {
    /// Table of `capacity` slots with the main thread in slot 0
    pub fn new(capacity: usize, main: Thread) -> Self {
        debug_assert_eq!(main.id(), MAIN_TID);
        let mut slots: Vec<Option<Box<Thread>>> = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        slots[MAIN_TID.index()] = Some(Box::new(main));

        Self { slots, len: 1 }
    }

    /// Maximum number of live threads, main included
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live threads
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest free ID, main slot excluded
    pub fn allocate(&self) -> Result<Tid> {
        if self.len >= self.capacity() {
            return Err(Error::CapacityExceeded(self.capacity()));
        }
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(index, _)| Tid(index))
            .ok_or(Error::CapacityExceeded(self.capacity()))
    }

    /// Place a thread in the slot matching its ID
    pub fn insert(&mut self, thread: Box<Thread>) {
        let index = thread.id().index();
        debug_assert!(self.slots[index].is_none(), "slot {index} already in use");
        self.slots[index] = Some(thread);
        self.len += 1;
    }

    /// Empty a slot, handing back its thread
    pub fn remove(&mut self, tid: Tid) -> Option<Box<Thread>> {
        let thread = self.slots.get_mut(tid.index())?.take()?;
        self.len -= 1;
        Some(thread)
    }

    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.slots.get(tid.index())?.as_deref()
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.slots.get_mut(tid.index())?.as_deref_mut()
    }

    /// Like [`get`](Self::get) but reports unknown IDs as an error
    pub fn lookup(&self, tid: Tid) -> Result<&Thread> {
        self.get(tid).ok_or(Error::InvalidThread(tid))
    }

    /// Like [`get_mut`](Self::get_mut) but reports unknown IDs as an error
    pub fn lookup_mut(&mut self, tid: Tid) -> Result<&mut Thread> {
        self.get_mut(tid).ok_or(Error::InvalidThread(tid))
    }

    /// Live threads in ID order
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(|slot| slot.as_deref())
    }

    /// Empty every slot, handing back the threads in ID order
    pub fn drain(&mut self) -> Vec<Box<Thread>> {
        self.len = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
