//! aarch64 context switching (AAPCS64)
//!
//! Callee-saved state is x19-x28, the frame pointer, the link register,
//! sp and the low halves of v8-v15.

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a suspended context
///
/// Field offsets are hard-coded in `context_switch`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedRegs {
    pub x19_x28: [u64; 10], // 0x00
    pub fp: u64,            // 0x50
    pub lr: u64,            // 0x58
    pub sp: u64,            // 0x60
    pub d8_d15: [u64; 8],   // 0x68
}

/// Initialize a fresh fiber context
///
/// When first switched to, the fiber calls `entry(arg)` on the stack
/// ending at `stack_top`.
///
/// # Safety
///
/// `stack_top` must be the top of a writable stack that stays mapped for
/// the lifetime of the fiber.
#[inline]
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let mut saved = SavedRegs::default();
    saved.x19_x28[0] = entry as usize as u64;
    saved.x19_x28[1] = arg as u64;
    saved.lr = fiber_trampoline as usize as u64;
    saved.sp = (stack_top as usize & !0xF) as u64;
    *regs = saved;
}

/// First instructions of every fiber: `entry(arg)`, which never returns
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save the current context into `old` and resume `new`
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// `new` must hold a context saved by `context_switch` or prepared by
/// `init_context`, whose stack is still mapped and not running.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save callee-saved registers to old (x0)
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
        // Load callee-saved registers from new (x1)
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
        // Jump to the saved link register
        "ret",
    );
}
