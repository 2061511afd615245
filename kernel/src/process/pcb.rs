//! Process control block.
//!
//! A process is, at minimum, one [`AddressSpace`] and the group of
//! threads sharing it. Kernel threads (the idle thread, the reaper) have
//! no `Process` at all: they run in kernel space and are owned directly
//! by the run queue.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::mm::vas::AddressSpace;
use crate::sched::task::Thread;

pub struct Process {
    pub pid: u32,
    pub addr_space: AddressSpace,
    /// Head of the thread-group list (walks via `Thread::sibling_next`).
    pub threads: Option<NonNull<Thread>>,
    pub thread_count: usize,
}

impl Process {
    pub fn new(pid: u32, addr_space: AddressSpace) -> Box<Process> {
        Box::new(Process {
            pid,
            addr_space,
            threads: None,
            thread_count: 0,
        })
    }

    pub fn add_thread(&mut self, mut thread: NonNull<Thread>) {
        // SAFETY: caller passes a thread not already linked into a
        // thread-group list.
        unsafe {
            thread.as_mut().sibling_next = self.threads;
        }
        self.threads = Some(thread);
        self.thread_count += 1;
    }

    pub fn remove_thread(&mut self, target: NonNull<Thread>) {
        let mut prev: Option<NonNull<Thread>> = None;
        let mut cursor = self.threads;
        while let Some(node) = cursor {
            // SAFETY: node is a live member of this process's thread list.
            let next = unsafe { node.as_ref().sibling_next };
            if node == target {
                match prev {
                    None => self.threads = next,
                    Some(mut p) => unsafe { p.as_mut().sibling_next = next },
                }
                self.thread_count -= 1;
                return;
            }
            prev = cursor;
            cursor = next;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thread_count == 0
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::frame;
    use crate::mm::VirtualAddress;
    use crate::sched::task::SchedClass;

    fn with_test_heap<R>(f: impl FnOnce() -> R) -> R {
        let backing = Box::leak(alloc::vec![0u8; 16 * 1024 * 1024].into_boxed_slice());
        let base = crate::mm::PhysicalAddress::new(backing.as_ptr() as u32);
        unsafe { frame::init(base, backing.len()) };
        f()
    }

    #[test]
    fn thread_group_tracks_count() {
        with_test_heap(|| {
            let space = AddressSpace::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x1000))
                .unwrap();
            let mut proc = Process::new(1, space);
            let t = Box::leak(Thread::new_kernel("t", 1, 4096, 0, 0, SchedClass::Fair));
            let ptr = NonNull::new(t as *mut Thread).unwrap();
            proc.add_thread(ptr);
            assert_eq!(proc.thread_count, 1);
            proc.remove_thread(ptr);
            assert!(proc.is_empty());
        });
    }
}
