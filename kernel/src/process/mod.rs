//! Process table: pid allocation, process creation/teardown, and the
//! idle-class dead-thread reaper.

pub mod pcb;
pub mod pid;

use alloc::boxed::Box;
use core::ptr::NonNull;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::vas::AddressSpace;
use crate::mm::VirtualAddress;
use crate::sched::task::{SchedClass, Thread, ThreadState};
use crate::sync::once_lock::GlobalState;

pub use pcb::Process;

static PID_TABLE: GlobalState<Mutex<pid::PidTable>> = GlobalState::new();

pub fn init() {
    let _ = PID_TABLE.init(Mutex::new(pid::PidTable::new()));
    log::info!("process table initialized");
}

fn alloc_pid() -> KernelResult<u32> {
    PID_TABLE
        .with(|t| t.lock().alloc())
        .unwrap_or(Err(KernelError::Fatal {
            reason: "pid table used before init",
        }))
}

fn free_pid(pid: u32) {
    PID_TABLE.with(|t| t.lock().free(pid));
}

/// Create a process with a single thread entering at `entry`. The
/// address space's code bounds are `[entry, entry)`: this kernel loads
/// no ELF, so the caller is responsible for having already mapped
/// whatever code the entry point runs (typically by `map_page`-ing it
/// into the returned process's address space before ever scheduling the
/// thread).
pub fn create_process(
    name: &str,
    entry: usize,
    arg0: usize,
    class: SchedClass,
) -> KernelResult<(Box<Process>, NonNull<Thread>)> {
    let pid = alloc_pid()?;
    let addr_space = AddressSpace::new(VirtualAddress::new(entry as u32), VirtualAddress::new(entry as u32))
        .inspect_err(|_| free_pid(pid))?;

    let mut process = Process::new(pid, addr_space);
    // SAFETY: `process`'s heap allocation outlives this pointer for as
    // long as the process exists; its `addr_space` field never moves
    // (Process is always accessed through the Box).
    let space_ptr = NonNull::from(&mut process.addr_space);

    const DEFAULT_STACK: usize = 8192;
    let thread = Thread::new_user(name, pid, pid, DEFAULT_STACK, entry, arg0, class, space_ptr);
    let thread_ptr = NonNull::new(Box::leak(thread) as *mut Thread).unwrap();
    let process_ptr = NonNull::from(process.as_ref());
    // SAFETY: thread_ptr was just leaked and is exclusively ours.
    unsafe {
        (*thread_ptr.as_ptr()).set_process(process_ptr);
    }

    process.add_thread(thread_ptr);
    crate::sched::add_thread(thread_ptr);
    Ok((process, thread_ptr))
}

/// Mark a thread dead and pull it off the run queue's ready/sleep
/// lists. It stays on the global thread list until [`reap`] runs, which
/// is what actually frees its kernel stack, control block, and (if it
/// was the last thread in its process) the process's address space and
/// pid.
pub fn kill_thread(thread: NonNull<Thread>) {
    // SAFETY: caller guarantees `thread` is a live, registered thread.
    unsafe {
        (*thread.as_ptr()).state = ThreadState::Dead;
    }
    crate::sched::retire(thread);
}

/// Reclaim one dead thread's resources, if any are pending. Intended to
/// be called from the idle thread's own loop body, since the idle class
/// only ever runs when every other class's ready queue is empty: dead
/// threads get cleaned up exactly when the CPU would otherwise be idle.
pub fn reap() -> bool {
    let Some(thread) = crate::sched::reap_one() else {
        return false;
    };

    // SAFETY: `thread` was just unlinked from every scheduler list by
    // reap_one and is reachable from nowhere else.
    let owner = unsafe { (*thread.as_ptr()).process };
    if let Some(mut proc_ptr) = owner {
        // SAFETY: the process outlives every thread that names it as
        // `process`, by construction of `create_process`.
        let process = unsafe { proc_ptr.as_mut() };
        process.remove_thread(thread);
        if process.is_empty() {
            let pid = process.pid;
            // SAFETY: no thread references this process anymore.
            drop(unsafe { Box::from_raw(proc_ptr.as_ptr()) });
            free_pid(pid);
        }
    }

    // SAFETY: thread's kernel stack was allocated by `Thread::new` as a
    // boxed slice of exactly `stack_size` bytes and leaked there; this is
    // its only remaining owner.
    unsafe {
        let (stack_base, stack_size) = (*thread.as_ptr()).stack_bounds();
        drop(Box::from_raw(core::slice::from_raw_parts_mut(
            stack_base as *mut u8,
            stack_size,
        )));
        drop(Box::from_raw(thread.as_ptr()));
    }
    true
}
