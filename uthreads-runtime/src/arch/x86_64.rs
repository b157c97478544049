//! x86_64 System V register file and switch routine

use std::arch::global_asm;

/// Callee-saved state of a suspended thread.
///
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Registers {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    mxcsr: u32,
    fpu_cw: u16,
    _pad: u16,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            // Power-on defaults: all exceptions masked, round to nearest
            mxcsr: 0x1F80,
            fpu_cw: 0x037F,
            _pad: 0,
        }
    }
}

impl Registers {
    /// Register file that enters `entry` on `stack_top` when first loaded.
    ///
    /// The bootstrap address sits on top of the stack so the `ret` at the
    /// end of the switch lands in it; `r12` carries the entry point.
    ///
    /// # Safety
    /// `stack_top` must be the exclusive upper end of a writable region of
    /// at least 16 bytes.
    pub unsafe fn fresh(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Self {
        let top = (stack_top as usize) & !0xF;
        let slot = (top - 16) as *mut u64;
        // SAFETY: caller guarantees the 16 bytes below top are writable
        unsafe { slot.write(uthreads_bootstrap as usize as u64) };

        Self {
            rsp: slot as u64,
            r12: entry as usize as u64,
            ..Self::default()
        }
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
    ".p2align 4",
    "uthreads_switch_context:",
    "mov [rdi + 0x00], rsp",
    "mov [rdi + 0x08], rbp",
    "mov [rdi + 0x10], rbx",
    "mov [rdi + 0x18], r12",
    "mov [rdi + 0x20], r13",
    "mov [rdi + 0x28], r14",
    "mov [rdi + 0x30], r15",
    "stmxcsr dword ptr [rdi + 0x38]",
    "fnstcw word ptr [rdi + 0x3c]",
    "mov rsp, [rsi + 0x00]",
    "mov rbp, [rsi + 0x08]",
    "mov rbx, [rsi + 0x10]",
    "mov r12, [rsi + 0x18]",
    "mov r13, [rsi + 0x20]",
    "mov r14, [rsi + 0x28]",
    "mov r15, [rsi + 0x30]",
    "ldmxcsr dword ptr [rsi + 0x38]",
    "fldcw word ptr [rsi + 0x3c]",
    "ret",
    "",
    ".global uthreads_bootstrap",
    ".p2align 4",
    "uthreads_bootstrap:",
    "and rsp, -16",
    "call r12",
    "ud2",
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_register_offsets_match_assembly() {
        assert_eq!(offset_of!(Registers, rsp), 0x00);
        assert_eq!(offset_of!(Registers, r15), 0x30);
        assert_eq!(offset_of!(Registers, mxcsr), 0x38);
        assert_eq!(offset_of!(Registers, fpu_cw), 0x3c);
        assert_eq!(size_of::<Registers>(), 0x40);
    }
}
