//! Scheduler: thread control blocks, per-class ready queues, and the
//! tick-driven run queue that ties them together.

pub mod queue;
pub mod scheduler;
pub mod task;

use core::ptr::NonNull;

use spin::Mutex;

use crate::arch::arm32::context::switch_context;
use crate::sync::once_lock::GlobalState;

pub use scheduler::RunQueue;
pub use task::{SchedClass, Thread, ThreadState};

static RUN_QUEUE: GlobalState<Mutex<RunQueue>> = GlobalState::new();

/// Bring up the run queue and drop in the idle thread, which becomes
/// `curr` until the first real thread is scheduled.
pub fn init() {
    let _ = RUN_QUEUE.init(Mutex::new(RunQueue::new()));

    let idle = Thread::new_kernel("idle", 0, 4096, idle_entry as usize, 0, SchedClass::Idle);
    let idle_ptr = NonNull::new(alloc::boxed::Box::leak(idle) as *mut Thread).unwrap();

    with_rq(|rq| {
        rq.add_thread(idle_ptr);
        rq.curr = Some(idle_ptr);
    });

    log::info!("scheduler initialized");
}

extern "C" fn idle_entry(_arg: u32) -> ! {
    loop {
        while crate::process::reap() {}
        crate::arch::idle();
    }
}

/// Enable preemption and enter the idle thread's own loop. Never
/// returns: the caller (`kernel_main`) has nothing left to do once the
/// scheduler is driving execution.
pub fn start() -> ! {
    with_rq(|rq| rq.enable());
    loop {
        crate::arch::idle();
    }
}

fn with_rq<R>(f: impl FnOnce(&mut RunQueue) -> R) -> R {
    RUN_QUEUE
        .with(|rq| f(&mut rq.lock()))
        .expect("scheduler used before sched::init")
}

/// Register a newly created thread with the run queue.
pub fn add_thread(thread: NonNull<Thread>) {
    with_rq(|rq| rq.add_thread(thread));
}

pub fn remove_thread(thread: NonNull<Thread>) {
    with_rq(|rq| rq.remove_thread(thread));
}

/// Pull a thread out of its ready/sleep queue but leave it on the global
/// thread list for the reaper to find.
pub fn retire(thread: NonNull<Thread>) {
    with_rq(|rq| rq.retire(thread));
}

/// Hand back one dead, already-retired thread for the caller to free.
pub fn reap_one() -> Option<NonNull<Thread>> {
    with_rq(|rq| rq.reap_one())
}

/// Current thread, if the scheduler has started.
pub fn current() -> Option<NonNull<Thread>> {
    with_rq(|rq| rq.curr)
}

/// Put the calling thread to sleep until `wake_tick`, then switch away.
///
/// # Safety
/// Must be called on the currently running thread's own behalf, with
/// interrupts enabled so the eventual wake tick can fire.
pub unsafe fn sleep_until(wake_tick: u64) {
    let Some(curr) = current() else { return };
    with_rq(|rq| rq.sleep_until(curr, wake_tick));
    reschedule();
}

/// Called from the timer IRQ: advance the tick count, wake any expired
/// sleepers, and switch if the current thread's slice has expired.
pub fn on_tick() {
    let (slice_expired, any_woken) = with_rq(|rq| {
        rq.tick();
        let woken = rq.wake_expired(rq.time.tick);
        let expired = rq.time.tick >= rq.time.tick_to_wake;
        if expired {
            rq.time.tick_to_wake = rq.time.tick + rq.time.window;
        }
        (expired, woken > 0)
    });

    if with_rq(|rq| rq.is_enabled()) && (slice_expired || any_woken) {
        reschedule();
    }
}

/// Pick a new `next` thread and, if it differs from `curr`, perform the
/// low-level stack switch.
pub fn reschedule() {
    let (prev, next) = with_rq(|rq| {
        let next = rq.pick_next().or(rq.curr);
        let prev = rq.curr;
        rq.next = next;
        (prev, next)
    });

    let (Some(mut prev), Some(mut next)) = (prev, next) else {
        return;
    };
    if prev == next {
        return;
    }

    with_rq(|rq| rq.curr = Some(next));

    // SAFETY: both pointers are live threads registered with the run
    // queue; `prev`'s saved-SP slot is its first field and `next`'s SP
    // was produced either by a prior `switch_context` or by
    // `Thread::new`'s fabricated initial stack.
    unsafe {
        switch_context(
            &mut prev.as_mut().sp as *mut usize,
            next.as_ref().sp,
        );
    }
}

/// Called from the lazy-FPU trap: if some other thread still owns the
/// live VFP registers, stack them into its own shadow before the
/// current thread touches the hardware.
pub fn fpu_switch_in() {
    let curr = current();
    with_rq(|rq| {
        if let Some(mut owner) = rq.lazy_fpu {
            if Some(owner) != curr {
                // SAFETY: owner is a live thread that previously held the
                // FPU; its shadow slot is exclusively ours to write while
                // the FPU trap handler runs with interrupts masked.
                unsafe {
                    save_fpu_state(&mut owner.as_mut().fpu);
                }
            }
        }
        rq.lazy_fpu = curr;
    });
}

/// # Safety
/// Must run with the FPU enabled (`fpu_trap` has already set `FPEXC.EN`
/// by the time this is called).
unsafe fn save_fpu_state(fpu: &mut crate::arch::arm32::context::FpuState) {
    // SAFETY: `fpu` is exclusively borrowed and 8-byte aligned as part of
    // `Thread`; vstm writes exactly 32 doublewords starting there.
    unsafe {
        core::arch::asm!(
            "vstmia {0}, {{d0-d15}}",
            "vstmia {1}, {{d16-d31}}",
            in(reg) fpu.d.as_mut_ptr(),
            in(reg) fpu.d.as_mut_ptr().add(16),
            options(nostack),
        );
        core::arch::asm!("vmrs {0}, fpscr", out(reg) fpu.fpscr, options(nostack, nomem));
    }
}
