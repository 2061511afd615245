//! System-call dispatch.
//!
//! `dispatch` is called from [`crate::arch::arm32::boot::arm32_svc_handler`]
//! with the four argument registers and the trapping mode's `cpsr`
//! already decoded from the frame; its return value is written back into
//! `r0`. Illegal SVC numbers leave `r0` unchanged, which `dispatch`
//! achieves by returning the caller's own `r0` right back.

use crate::sched::task::SchedClass;

const SVC_CREATE_THREAD: u32 = 0;
const SVC_SET_BREAK: u32 = 1;
const SVC_ALLOC_PAGE: u32 = 2;
const SVC_KILL: u32 = 3;
const SVC_SLEEP: u32 = 8;
const SVC_GET_CPSR: u32 = 9;

/// `-1` as a `u32`, the convention every handler here uses for "failed".
const FAIL: u32 = u32::MAX;

pub fn dispatch(svc: u32, r0: u32, r1: u32, r2: u32, r3: u32, cpsr: u32) -> u32 {
    match svc {
        SVC_CREATE_THREAD => sys_create_thread(r0, r1, r2),
        SVC_SET_BREAK => sys_set_break(r0 as i32),
        SVC_ALLOC_PAGE => sys_alloc_page(),
        SVC_KILL => sys_kill(r0),
        SVC_SLEEP => sys_sleep(r0),
        SVC_GET_CPSR => cpsr,
        _ => r0,
    }
}

/// r0 = entry point, r1 = arg0, r2 = scheduling class (0=RT,1=fair,
/// 2=background,3=idle). Returns the new thread's tid, or `FAIL`.
fn sys_create_thread(entry: u32, arg0: u32, class: u32) -> u32 {
    let class = match class {
        0 => SchedClass::RealTime,
        1 => SchedClass::Fair,
        2 => SchedClass::Background,
        _ => SchedClass::Idle,
    };
    match crate::process::create_process("user", entry as usize, arg0 as usize, class) {
        Ok((process, _thread)) => {
            let pid = process.pid;
            // The process table now owns `process` through its thread's
            // `process` pointer; dropping the local handle here would
            // free it out from under that pointer, so it must leak.
            core::mem::forget(process);
            pid
        }
        Err(_) => FAIL,
    }
}

/// r0 = signed byte delta (0 just queries). Operates on the calling
/// thread's own address space.
fn sys_set_break(delta: i32) -> u32 {
    let Some(curr) = crate::sched::current() else {
        return FAIL;
    };
    // SAFETY: curr is the live running thread; its addr_space outlives
    // the syscall that's executing on its behalf.
    let Some(mut space) = (unsafe { (*curr.as_ptr()).addr_space }) else {
        return FAIL;
    };
    // SAFETY: space is a live AddressSpace owned by curr's process.
    match unsafe { space.as_mut() }.sbrk(delta) {
        Ok(addr) => addr.as_u32(),
        Err(_) => FAIL,
    }
}

/// Debug syscall: hand back one raw physical page, identity-value
/// encoded as its frame base address. Never mapped into any address
/// space; purely for bring-up diagnostics before a real userland has a
/// page-fault-driven allocator of its own.
fn sys_alloc_page() -> u32 {
    match crate::mm::frame::alloc() {
        Ok(frame) => frame.addr().as_u32(),
        Err(_) => FAIL,
    }
}

/// r0 = tid of the thread to kill. This build only supports killing the
/// calling thread's own process's lead thread (no cross-process kill
/// permission model is specified), so tid must match the caller.
fn sys_kill(tid: u32) -> u32 {
    let Some(curr) = crate::sched::current() else {
        return FAIL;
    };
    // SAFETY: curr is the live running thread.
    if unsafe { (*curr.as_ptr()).tid } != tid {
        return FAIL;
    }
    crate::process::kill_thread(curr);
    crate::sched::reschedule();
    0
}

/// r0 = ticks to sleep.
fn sys_sleep(ticks: u32) -> u32 {
    let wake = crate::arch::arm32::timer::get_ticks() + ticks as u64;
    // SAFETY: called from SVC context with interrupts enabled, on the
    // calling thread's own behalf.
    unsafe { crate::sched::sleep_until(wake) };
    0
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn unknown_svc_number_returns_r0_unchanged() {
        assert_eq!(dispatch(200, 0xdead_beef, 0, 0, 0, 0), 0xdead_beef);
    }

    #[test]
    fn get_cpsr_returns_the_passed_cpsr() {
        assert_eq!(dispatch(SVC_GET_CPSR, 0, 0, 0, 0, 0x13), 0x13);
    }
}
