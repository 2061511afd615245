//! Thread control blocks.
//!
//! A [`Thread`]'s first two fields are fixed by the low-level switch
//! path: `sp` is where [`switch_context`](crate::arch::arm32::context::switch_context)
//! stashes the outgoing stack pointer, `addr_space` is read by the
//! scheduler to decide whether TTBR0 needs reloading across a switch.
//! Everything below that line is ordinary bookkeeping.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::arch::arm32::context::{self, FpuState, TrapFrame};
use crate::mm::vas::AddressSpace;

pub const THREAD_MAX_NAME: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Sleep,
    Wait,
    Stopped,
    Dead,
}

/// Position in the scheduler's fixed priority chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    RealTime,
    Fair,
    Background,
    Idle,
}

impl SchedClass {
    /// Classes in priority order, real-time first, idle last.
    pub const CHAIN: [SchedClass; 4] = [
        SchedClass::RealTime,
        SchedClass::Fair,
        SchedClass::Background,
        SchedClass::Idle,
    ];
}

#[repr(C)]
pub struct Thread {
    /// Saved kernel stack pointer (must be first).
    pub sp: usize,
    /// Owning address space, `None` for kernel threads (must be second).
    pub addr_space: Option<NonNull<AddressSpace>>,

    /// Lazily-stacked VFP register bank; touched only by a lazy-FPU trap.
    pub fpu: FpuState,

    stack_base: usize,
    stack_size: usize,

    pub tick_to_wake: u64,
    pub runtime: u64,
    pub last_runtime: u64,

    name: [u8; THREAD_MAX_NAME],
    pub tid: u32,
    pub pid: u32,

    /// Next thread in whichever queue currently owns this thread: a
    /// class's ready queue, or the sleep list. A thread is a member of
    /// at most one at a time, so one link suffices for both.
    pub queue_next: Option<NonNull<Thread>>,
    /// Next thread in the global all-threads list.
    pub thread_list_next: Option<NonNull<Thread>>,
    /// Next sibling in the owning process's thread-group list.
    pub sibling_next: Option<NonNull<Thread>>,
    /// Owning process, `None` for kernel threads.
    pub process: Option<NonNull<crate::process::pcb::Process>>,

    pub class: SchedClass,
    pub state: ThreadState,
}

/// 8-byte AAPCS stack alignment pad plus the fabricated callee-saved
/// block `switch_context` expects below a fresh [`TrapFrame`]: r4-r11
/// (unused, a fresh thread never resumes mid-function) and `lr`, set to
/// [`context::thread_trampoline_addr`].
#[repr(C)]
struct SwitchFrame {
    callee_saved: [usize; 8],
    lr: usize,
}

impl Thread {
    /// Build a thread ready for its first dispatch: `entry` runs with
    /// `arg0` in r0, program status `cpsr`, on a freshly allocated
    /// `stack_size`-byte kernel stack.
    fn new(
        name: &str,
        tid: u32,
        pid: u32,
        class: SchedClass,
        stack_size: usize,
        entry: usize,
        arg0: usize,
        cpsr: u32,
        addr_space: Option<NonNull<AddressSpace>>,
    ) -> Box<Thread> {
        let stack = Box::leak(alloc::vec![0u8; stack_size].into_boxed_slice());
        let stack_base = stack.as_ptr() as usize;
        let top = (stack_base + stack_size) & !0x7;

        let frame_addr = top - core::mem::size_of::<TrapFrame>();
        let frame_addr = frame_addr & !0x7;
        // SAFETY: frame_addr lies within the just-allocated stack and is
        // suitably aligned; nothing else references this memory yet.
        unsafe {
            (frame_addr as *mut TrapFrame).write(TrapFrame {
                cpsr,
                ..TrapFrame::initial(entry, 0, arg0)
            });
        }

        let switch_addr = frame_addr - core::mem::size_of::<SwitchFrame>();
        // SAFETY: switch_addr sits directly below the trap frame, still
        // within the stack allocation.
        unsafe {
            (switch_addr as *mut SwitchFrame).write(SwitchFrame {
                callee_saved: [0; 8],
                lr: context::thread_trampoline_addr(),
            });
        }

        let mut padded_name = [0u8; THREAD_MAX_NAME];
        let bytes = name.as_bytes();
        let len = bytes.len().min(THREAD_MAX_NAME - 1);
        padded_name[..len].copy_from_slice(&bytes[..len]);

        Box::new(Thread {
            sp: switch_addr,
            addr_space,
            fpu: FpuState::empty(),
            stack_base,
            stack_size,
            tick_to_wake: 0,
            runtime: 0,
            last_runtime: 0,
            name: padded_name,
            tid,
            pid,
            queue_next: None,
            thread_list_next: None,
            sibling_next: None,
            process: None,
            class,
            state: ThreadState::Stopped,
        })
    }

    /// A kernel thread: privileged mode throughout, shares the kernel's
    /// own address space (so `addr_space` is `None`; TTBR0 is simply
    /// left alone across a switch to or from it).
    pub fn new_kernel(
        name: &str,
        tid: u32,
        stack_size: usize,
        entry: usize,
        arg0: usize,
        class: SchedClass,
    ) -> Box<Thread> {
        const SVC_MODE: u32 = 0b10011;
        Self::new(name, tid, 0, class, stack_size, entry, arg0, SVC_MODE, None)
    }

    /// A user thread belonging to `addr_space`, entering at `entry` in
    /// user mode with its stack pointer already set by the caller via
    /// the address space's mapped user stack (the saved trap frame's own
    /// `sp` field is unused; user SP lives in the banked USR register
    /// set, restored implicitly on first `rfeia` since it was never
    /// touched).
    pub fn new_user(
        name: &str,
        tid: u32,
        pid: u32,
        stack_size: usize,
        entry: usize,
        arg0: usize,
        class: SchedClass,
        addr_space: NonNull<AddressSpace>,
    ) -> Box<Thread> {
        const USR_MODE: u32 = 0b10000;
        Self::new(
            name,
            tid,
            pid,
            class,
            stack_size,
            entry,
            arg0,
            USR_MODE,
            Some(addr_space),
        )
    }

    /// Attach this thread to its owning process, for the reaper to walk
    /// back from a dead thread to the process it may be the last member
    /// of.
    pub fn set_process(&mut self, process: NonNull<crate::process::pcb::Process>) {
        self.process = Some(process);
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    pub fn stack_bounds(&self) -> (usize, usize) {
        (self.stack_base, self.stack_size)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn kernel_thread_gets_a_kernel_mode_trap_frame() {
        let thread = Thread::new_kernel("k", 1, 4096, 0x1000, 0, SchedClass::Background);
        assert_eq!(thread.name(), "k");
        assert_eq!(thread.state, ThreadState::Stopped);
        assert!(thread.addr_space.is_none());
    }

    #[test]
    fn long_names_are_truncated_not_overrun() {
        let long = "x".repeat(64);
        let thread = Thread::new_kernel(&long, 2, 4096, 0x1000, 0, SchedClass::Fair);
        assert_eq!(thread.name().len(), THREAD_MAX_NAME - 1);
    }
}
