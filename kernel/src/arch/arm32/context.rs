//! Trap frame layout and the low-level context switch/FPU trap.
//!
//! The trap frame is a data layout, not a policy: every exception entry
//! (SVC, IRQ, undefined instruction) pushes the same register set before
//! calling into Rust, so one struct serves the syscall dispatcher, the
//! tick IRQ handler, and the lazy-FPU trap alike.

use core::arch::asm;

/// Registers saved on exception entry, in push order. `lr` here is the
/// banked link register of the mode that trapped (already adjusted by
/// the vector stub to point at the instruction to resume, except for
/// SVC where the dispatcher itself computes `svc_number` from `lr - 4`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl TrapFrame {
    /// Decode the SVC immediate from the faulting instruction at `pc - 4`.
    ///
    /// # Safety
    /// `self.pc` must point just past a real `svc #imm` instruction (true
    /// for any frame reaching here via the SVC vector).
    pub unsafe fn svc_number(&self) -> u32 {
        // SAFETY: upheld by caller; SVC instructions are 4 bytes in ARM
        // state, and the mode this kernel runs user threads in is ARM-only.
        let insn = unsafe { core::ptr::read((self.pc - 4) as *const u32) };
        insn & 0x00FF_FFFF
    }

    /// Build the initial trap frame for a brand-new thread, as if it had
    /// just trapped in from user mode at `entry` with argument `arg0` and
    /// stack pointer `sp`.
    pub fn initial(entry: usize, _sp: usize, arg0: usize) -> Self {
        const USR_MODE: u32 = 0b10000;
        // The user stack pointer is banked per-mode and restored by the
        // vector stub from the thread's saved banked-SP slot, not from
        // this frame; `_sp` is accepted so callers building a frame and a
        // stack together have one call site.
        Self {
            r0: arg0 as u32,
            pc: entry as u32,
            cpsr: USR_MODE,
            ..Default::default()
        }
    }
}

/// Saved FPU (VFP) register bank: 32 doublewords plus the two control
/// registers. Only touched on a lazy-FPU trap, never on an ordinary
/// context switch.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FpuState {
    pub d: [u64; 32],
    pub fpscr: u32,
}

impl FpuState {
    pub const fn empty() -> Self {
        Self {
            d: [0; 32],
            fpscr: 0,
        }
    }
}

/// Switch the CPU from `prev`'s kernel stack to `next`'s.
///
/// Saves the callee-saved registers (r4-r11, lr) of the outgoing thread
/// onto its own kernel stack, stores the resulting stack pointer through
/// `prev_sp`, then loads `next_sp` and pops the incoming thread's
/// callee-saved registers before returning into it.
///
/// # Safety
/// `prev_sp` must point at the outgoing [`crate::sched::task::Thread`]'s
/// saved-SP slot (its first field) and `next_sp` must be a stack pointer
/// previously produced by this same function or by [`TrapFrame::initial`]
/// laid out on a fresh kernel stack.
#[unsafe(naked)]
#[allow(unused_variables)]
pub unsafe extern "C" fn switch_context(prev_sp: *mut usize, next_sp: usize) {
    core::arch::naked_asm!(
        "push {{r4-r11, lr}}",
        "str sp, [r0]",
        "mov sp, r1",
        "pop {{r4-r11, lr}}",
        "bx lr",
    )
}

core::arch::global_asm!(
    r#"
.section .text, "ax"
.global arm32_thread_trampoline
arm32_thread_trampoline:
    pop {{r0-r12, lr}}
    rfeia sp!
"#
);

#[unsafe(link_section = ".text")]
extern "C" {
    /// Entry point for a thread's very first dispatch: pops the
    /// [`TrapFrame`] a freshly constructed
    /// [`Thread`](crate::sched::task::Thread) built on its kernel stack
    /// and returns into it, exactly like the tail of an ordinary
    /// exception return. `switch_context` lands here by loading it as
    /// the `lr` of the fabricated callee-saved block just below that
    /// frame.
    fn arm32_thread_trampoline();
}

/// Address to store as the fabricated `lr` below a fresh thread's
/// initial [`TrapFrame`], so its first [`switch_context`] lands in
/// [`arm32_thread_trampoline`] instead of some other thread's call site.
pub fn thread_trampoline_addr() -> usize {
    arm32_thread_trampoline as usize
}

/// Invoked from the undefined-instruction vector when the FPU is
/// disabled and a thread touches it (lazy FPU fault).
///
/// Enables the FPU (`FPEXC.EN`), and if some other thread still owns the
/// live register bank, stacks its state into its own [`FpuState`] slot
/// before the current thread is allowed to use the hardware registers
/// directly. A real UNDEF (not caused by a disabled FPU) is not
/// recoverable here and escalates to [`crate::arch::arm32::panic_fault`].
pub fn fpu_trap() {
    let fpexc: u32;
    // SAFETY: FPEXC is always readable; VFP presence is an assumption of
    // this architecture target.
    unsafe {
        asm!("vmrs {0}, fpexc", out(reg) fpexc, options(nostack, nomem));
    }

    const FPEXC_EN: u32 = 1 << 30;
    const FPEXC_DEX: u32 = 1 << 29;

    if fpexc & FPEXC_DEX != 0 || fpexc & FPEXC_EN != 0 {
        panic!("undefined instruction exception (not a lazy-FPU fault)");
    }

    // SAFETY: setting EN is the documented way to re-enable the coprocessor;
    // dsb ensures the write is visible before any VFP instruction retries.
    unsafe {
        asm!("vmsr fpexc, {0}", in(reg) fpexc | FPEXC_EN, options(nostack, nomem));
    }
    crate::arch::barriers::data_sync_barrier();

    crate::sched::fpu_switch_in();
}
