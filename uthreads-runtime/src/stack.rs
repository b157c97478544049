//! Thread stacks
//!
//! Every spawned thread owns one anonymous mapping. The lowest page of the
//! mapping is made inaccessible so that an overflow faults instead of
//! silently corrupting a neighbouring allocation.

use crate::error::{Error, Result};
use std::ptr::NonNull;

/// Exclusively owned, fixed-size stack region
pub struct Stack {
    base: NonNull<u8>,
    guard_len: usize,
    // Keep the mapping alive; unmapped on drop
    mmap: memmap2::MmapMut,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes plus one guard page
    pub fn new(size: usize) -> Result<Self> {
        let page = page_size();
        let usable = size.div_ceil(page) * page;
        let len = usable + page;

        let mut mmap = memmap2::MmapOptions::new()
            .len(len)
            .stack()
            .map_anon()
            .map_err(Error::Stack)?;

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| Error::Stack(std::io::Error::other("mmap returned null")))?;

        // SAFETY: the first page lies inside the mapping we just created
        let rc = unsafe { libc::mprotect(base.as_ptr().cast(), page, libc::PROT_NONE) };
        if rc != 0 {
            return Err(Error::Stack(std::io::Error::last_os_error()));
        }

        Ok(Self {
            base,
            guard_len: page,
            mmap,
        })
    }

    /// Exclusive upper end of the stack; stacks grow down from here
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base + mapping length is one past the end of the mapping
        unsafe { self.base.as_ptr().add(self.mmap.len()) }
    }

    /// Usable bytes below `top`, excluding the guard page
    #[inline]
    pub fn usable_len(&self) -> usize {
        self.mmap.len() - self.guard_len
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("top", &self.top())
            .field("usable_len", &self.usable_len())
            .finish()
    }
}

/// System page size
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
