//! The run queue: one per CPU (this kernel only ever instantiates one).
//!
//! The first two fields, `next` and `curr`, are deliberately the very
//! first two words of the struct and nothing above them may be
//! rearranged: a context switch only ever needs to read and write those
//! two pointers, and keeping them at a fixed offset keeps that path
//! simple to reason about even though nothing on this port currently
//! takes advantage of raw offset access.

use core::ptr::NonNull;

use super::queue::RunList;
use super::task::{SchedClass, Thread, ThreadState};

/// Per-class tick accounting: how long the current thread may run before
/// the next thread in its class is due, independent of the underlying
/// tick rate.
pub struct TimeSlice {
    pub tick: u64,
    pub tick_to_wake: u64,
    /// Microseconds accumulated in the current accounting window; rolls
    /// over at [`ACCOUNTING_WINDOW_US`].
    pub tick_window: u64,
    pub window: u64,
}

impl TimeSlice {
    const fn new(window: u64) -> Self {
        Self {
            tick: 0,
            tick_to_wake: 0,
            tick_window: 0,
            window,
        }
    }
}

/// Nominal duration of one scheduler tick, matching the timer's
/// tick-to-millisecond assumption.
const TICK_US: u64 = 1000;

/// Length of a CPU-usage accounting window: every million microseconds,
/// the running thread's cumulative `runtime` snapshot rotates into
/// `last_runtime`.
const ACCOUNTING_WINDOW_US: u64 = 1_000_000;

pub struct RunQueue {
    /// Thread the scheduler will switch to next (must stay first).
    pub next: Option<NonNull<Thread>>,
    /// Thread currently executing (must stay second).
    pub curr: Option<NonNull<Thread>>,

    real_time: RunList,
    fair: RunList,
    background: RunList,
    idle: RunList,

    /// Sorted ascending by `tick_to_wake`; only its head is ever
    /// inspected per tick, so no reason to search further.
    sleeping: RunList,

    /// Every thread ever created, for enumeration (`ps`-style listing,
    /// and teardown on process exit).
    all_threads: RunList,

    /// Thread whose FPU bank is currently live in hardware, if any.
    pub lazy_fpu: Option<NonNull<Thread>>,

    pub time: TimeSlice,
    enabled: bool,
}

// SAFETY: the run queue is always accessed through a spin::Mutex behind
// the single-core `RUN_QUEUE` static; no RunQueue escapes that lock.
unsafe impl Send for RunQueue {}

/// Ticks a thread runs before round-robining to the next in its class.
const DEFAULT_WINDOW: u64 = 10;

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            next: None,
            curr: None,
            real_time: RunList::new(),
            fair: RunList::new(),
            background: RunList::new(),
            idle: RunList::new(),
            sleeping: RunList::new(),
            all_threads: RunList::new(),
            lazy_fpu: None,
            time: TimeSlice::new(DEFAULT_WINDOW),
            enabled: false,
        }
    }

    fn class_queue(&mut self, class: SchedClass) -> &mut RunList {
        match class {
            SchedClass::RealTime => &mut self.real_time,
            SchedClass::Fair => &mut self.fair,
            SchedClass::Background => &mut self.background,
            SchedClass::Idle => &mut self.idle,
        }
    }

    /// Register a freshly created thread: link it into the global list
    /// and its class's ready queue.
    pub fn add_thread(&mut self, mut thread: NonNull<Thread>) {
        // SAFETY: caller hands over a thread not yet known to this queue.
        let class = unsafe { thread.as_ref().class };
        unsafe { thread.as_mut().state = ThreadState::Running };
        self.all_threads.push_back(thread);
        self.class_queue(class).push_back(thread);
    }

    pub fn enqueue(&mut self, thread: NonNull<Thread>) {
        // SAFETY: see add_thread.
        let class = unsafe { thread.as_ref().class };
        self.class_queue(class).push_back(thread);
    }

    pub fn dequeue(&mut self, thread: NonNull<Thread>) -> bool {
        // SAFETY: see add_thread.
        let class = unsafe { thread.as_ref().class };
        self.class_queue(class).remove(thread)
    }

    /// Pick the next thread to run: consult classes in priority order,
    /// real-time first, and round-robin within whichever class yields
    /// one.
    pub fn pick_next(&mut self) -> Option<NonNull<Thread>> {
        for class in SchedClass::CHAIN {
            if let Some(thread) = self.class_queue(class).pick_next() {
                return Some(thread);
            }
        }
        None
    }

    /// Move `thread` out of its ready queue and onto the sorted sleep
    /// list, waking at `wake_tick`.
    pub fn sleep_until(&mut self, mut thread: NonNull<Thread>, wake_tick: u64) {
        let class = unsafe { thread.as_ref().class };
        self.class_queue(class).remove(thread);
        unsafe {
            thread.as_mut().tick_to_wake = wake_tick;
            thread.as_mut().state = ThreadState::Sleep;
        }
        self.sleeping.insert_by_wake_tick(thread);
    }

    /// Move every thread whose wake tick has passed back onto its
    /// class's ready queue. The list is sorted ascending by `tick_to_wake`,
    /// so this stops at the first thread not yet due instead of scanning
    /// the rest. Returns how many woke, so the caller can decide whether a
    /// reschedule is worth forcing this tick.
    pub fn wake_expired(&mut self, now: u64) -> usize {
        let mut woken = 0;
        while let Some(thread) = self.sleeping.front() {
            // SAFETY: thread is a live member of the sleep list.
            if unsafe { thread.as_ref().tick_to_wake } > now {
                break;
            }
            let mut thread = self.sleeping.pop_front().expect("front() just returned Some");
            unsafe { thread.as_mut().state = ThreadState::Running };
            let class = unsafe { thread.as_ref().class };
            self.class_queue(class).push_back(thread);
            woken += 1;
        }
        woken
    }

    pub fn remove_thread(&mut self, thread: NonNull<Thread>) {
        self.retire(thread);
        self.all_threads.remove(thread);
    }

    /// Pull a thread out of whichever ready/sleep queue it's in, without
    /// forgetting it entirely: it stays on the global thread list so the
    /// reaper can still find it and free its resources.
    pub fn retire(&mut self, thread: NonNull<Thread>) {
        let class = unsafe { thread.as_ref().class };
        self.class_queue(class).remove(thread);
        self.sleeping.remove(thread);
        if self.lazy_fpu == Some(thread) {
            self.lazy_fpu = None;
        }
    }

    /// Find and unlink the first dead thread on the global list, if any.
    /// The caller (the process-exit reaper) owns freeing its resources
    /// after this returns.
    pub fn reap_one(&mut self) -> Option<NonNull<Thread>> {
        let mut cursor = self.all_threads.pop_front();
        let mut held = RunList::new();
        let mut found = None;
        while let Some(thread) = cursor {
            // SAFETY: thread is a live member of the global thread list.
            if found.is_none() && unsafe { thread.as_ref().state } == ThreadState::Dead {
                found = Some(thread);
            } else {
                held.push_back(thread);
            }
            cursor = self.all_threads.pop_front();
        }
        self.all_threads = held;
        found
    }

    /// Advance the tick count and charge the running thread for the
    /// quantum just consumed, rotating its runtime snapshot at each
    /// accounting window boundary.
    pub fn tick(&mut self) {
        self.time.tick += 1;
        let Some(mut curr) = self.curr else { return };
        // SAFETY: curr is the live running thread.
        unsafe {
            curr.as_mut().runtime += TICK_US;
        }
        self.time.tick_window += TICK_US;
        if self.time.tick_window >= ACCOUNTING_WINDOW_US {
            self.time.tick_window -= ACCOUNTING_WINDOW_US;
            // SAFETY: see above.
            unsafe {
                let runtime = curr.as_ref().runtime;
                curr.as_mut().last_runtime = runtime;
            }
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn thread_count(&self) -> usize {
        self.all_threads.len()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn leak(t: Box<Thread>) -> NonNull<Thread> {
        NonNull::new(Box::leak(t) as *mut Thread).unwrap()
    }

    #[test]
    fn real_time_threads_preempt_the_fair_class_in_pick_order() {
        let mut rq = RunQueue::new();
        let fair = leak(Thread::new_kernel("f", 1, 4096, 0, 0, SchedClass::Fair));
        let rt = leak(Thread::new_kernel("r", 2, 4096, 0, 0, SchedClass::RealTime));
        rq.add_thread(fair);
        rq.add_thread(rt);
        assert_eq!(rq.pick_next(), Some(rt));
    }

    #[test]
    fn sleeping_threads_leave_the_ready_queue_until_woken() {
        let mut rq = RunQueue::new();
        let a = leak(Thread::new_kernel("a", 1, 4096, 0, 0, SchedClass::Fair));
        rq.add_thread(a);
        rq.sleep_until(a, 100);
        assert!(rq.pick_next().is_none());
        assert_eq!(rq.wake_expired(50), 0);
        assert_eq!(rq.wake_expired(150), 1);
        assert_eq!(rq.pick_next(), Some(a));
    }

    #[test]
    fn sleep_list_stays_sorted_regardless_of_insertion_order() {
        let mut rq = RunQueue::new();
        let late = leak(Thread::new_kernel("late", 1, 4096, 0, 0, SchedClass::Fair));
        let early = leak(Thread::new_kernel("early", 2, 4096, 0, 0, SchedClass::Fair));
        let mid = leak(Thread::new_kernel("mid", 3, 4096, 0, 0, SchedClass::Fair));
        rq.add_thread(late);
        rq.add_thread(early);
        rq.add_thread(mid);
        rq.sleep_until(late, 300);
        rq.sleep_until(early, 100);
        rq.sleep_until(mid, 200);
        // Threads must wake in ascending wake-tick order, not insertion order.
        assert_eq!(rq.wake_expired(100), 1);
        assert_eq!(rq.wake_expired(200), 1);
        assert_eq!(rq.wake_expired(300), 1);
    }

    #[test]
    fn tick_accumulates_cumulative_runtime_for_the_current_thread() {
        let mut rq = RunQueue::new();
        let c = leak(Thread::new_kernel("c", 1, 4096, 0, 0, SchedClass::Fair));
        rq.add_thread(c);
        rq.curr = Some(c);
        for _ in 0..8 {
            rq.tick();
        }
        // SAFETY: c is still live, leaked for the duration of the test.
        assert!(unsafe { c.as_ref().runtime } >= 8 * TICK_US);
    }

    #[test]
    fn runtime_rotates_into_last_runtime_at_the_window_boundary() {
        let mut rq = RunQueue::new();
        let c = leak(Thread::new_kernel("c", 1, 4096, 0, 0, SchedClass::Fair));
        rq.add_thread(c);
        rq.curr = Some(c);
        let ticks_per_window = (ACCOUNTING_WINDOW_US / TICK_US) as usize;
        for _ in 0..ticks_per_window {
            rq.tick();
        }
        // SAFETY: c is still live, leaked for the duration of the test.
        unsafe {
            assert_eq!(c.as_ref().last_runtime, c.as_ref().runtime);
        }
    }
}
