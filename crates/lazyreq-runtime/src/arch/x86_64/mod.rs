//! x86_64 context switching (System V AMD64)
//!
//! Uses naked functions, stable since Rust 1.88.

use super::EntryFn;
use std::arch::naked_asm;

/// Default MXCSR: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;

/// Default x87 control word: extended precision, exceptions masked
const FPU_CW_DEFAULT: u16 = 0x037F;

/// Callee-saved state of a suspended context
///
/// Field offsets are hard-coded in `context_switch`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedRegs {
    pub rsp: u64,    // 0x00
    pub rip: u64,    // 0x08
    pub rbx: u64,    // 0x10
    pub rbp: u64,    // 0x18
    pub r12: u64,    // 0x20
    pub r13: u64,    // 0x28
    pub r14: u64,    // 0x30
    pub r15: u64,    // 0x38
    pub mxcsr: u32,  // 0x40
    pub fpu_cw: u16, // 0x44
    _pad: u16,
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
    // The trampoline's `call` pushes a return address, so a 16-byte aligned
    // rsp here gives the entry function the ABI's rsp+8 alignment.
    let sp = stack_top as usize & !0xF;

    *regs = SavedRegs {
        rsp: sp as u64,
        rip: fiber_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: arg as u64,
        mxcsr: MXCSR_DEFAULT,
        fpu_cw: FPU_CW_DEFAULT,
        ..SavedRegs::default()
    };
}

/// First instructions of every fiber: `entry(arg)`, which never returns
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
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
        // Save callee-saved registers to old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr dword ptr [rdi + 0x40]",
        "fnstcw word ptr [rdi + 0x44]",
        // Load callee-saved registers from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr dword ptr [rsi + 0x40]",
        "fldcw word ptr [rsi + 0x44]",
        "jmp rax",
        // Resume point of a saved context
        "1:",
        "ret",
    );
}
