//! AArch64 AAPCS64 register file and switch routine

use std::arch::global_asm;

/// Callee-saved state of a suspended thread.
///
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Registers {
    /// x19..=x28
    x: [u64; 10],
    fp: u64,
    lr: u64,
    sp: u64,
    /// Low halves of v8..=v15
    d: [u64; 8],
    fpcr: u64,
}

impl Registers {
    /// Register file that enters `entry` on `stack_top` when first loaded.
    ///
    /// `lr` points at the bootstrap so the `ret` at the end of the switch
    /// lands in it; `x19` carries the entry point.
    ///
    /// # Safety
    /// `stack_top` must be the exclusive upper end of a writable stack.
    pub unsafe fn fresh(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Self {
        let mut regs = Self {
            lr: uthreads_bootstrap as usize as u64,
            sp: (stack_top as usize as u64) & !0xF,
            ..Self::default()
        };
        regs.x[0] = entry as usize as u64;
        regs
    }
}

extern "C" {
    /// Saves the callee-saved registers into `save` and loads `load`.
    ///
    /// Returns in the saving thread only when its registers are loaded again.
    pub fn uthreads_switch_context(save: *mut Registers, load: *const Registers);

    fn uthreads_bootstrap();
}

global_asm!(
    ".text",
    ".global uthreads_switch_context",
    ".p2align 2",
    "uthreads_switch_context:",
    "stp x19, x20, [x0, #0x00]",
    "stp x21, x22, [x0, #0x10]",
    "stp x23, x24, [x0, #0x20]",
    "stp x25, x26, [x0, #0x30]",
    "stp x27, x28, [x0, #0x40]",
    "stp x29, x30, [x0, #0x50]",
    "mov x9, sp",
    "str x9, [x0, #0x60]",
    "stp d8, d9, [x0, #0x68]",
    "stp d10, d11, [x0, #0x78]",
    "stp d12, d13, [x0, #0x88]",
    "stp d14, d15, [x0, #0x98]",
    "mrs x10, fpcr",
    "str x10, [x0, #0xa8]",
    "ldp x19, x20, [x1, #0x00]",
    "ldp x21, x22, [x1, #0x10]",
    "ldp x23, x24, [x1, #0x20]",
    "ldp x25, x26, [x1, #0x30]",
    "ldp x27, x28, [x1, #0x40]",
    "ldp x29, x30, [x1, #0x50]",
    "ldr x9, [x1, #0x60]",
    "mov sp, x9",
    "ldp d8, d9, [x1, #0x68]",
    "ldp d10, d11, [x1, #0x78]",
    "ldp d12, d13, [x1, #0x88]",
    "ldp d14, d15, [x1, #0x98]",
    "ldr x10, [x1, #0xa8]",
    "msr fpcr, x10",
    "ret",
    "",
    ".global uthreads_bootstrap",
    ".p2align 2",
    "uthreads_bootstrap:",
    "blr x19",
    "brk #1",
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_register_offsets_match_assembly() {
        assert_eq!(offset_of!(Registers, fp), 0x50);
        assert_eq!(offset_of!(Registers, sp), 0x60);
        assert_eq!(offset_of!(Registers, d), 0x68);
        assert_eq!(offset_of!(Registers, fpcr), 0xa8);
        assert_eq!(size_of::<Registers>(), 0xb0);
    }
}
