//! Kernel heap: a bespoke SLOB (simple list of blocks) allocator over a
//! static backing array.
//!
//! First-fit, address-ordered free list, coalescing neighbors on free.
//! No size classes: this kernel's own allocations (scheduler queues,
//! process control blocks, FAT32 directory caches) are few enough in
//! kind that slab classes would just add bookkeeping over a plain free
//! list.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Forces the backing array onto an 8-byte boundary so every block base
/// carved out of it stays granule-aligned.
#[repr(align(8))]
struct HeapBacking([u8; HEAP_SIZE]);

#[unsafe(link_section = ".bss.heap")]
static mut HEAP_MEMORY: HeapBacking = HeapBacking([0; HEAP_SIZE]);

const MIN_BLOCK: usize = core::mem::size_of::<FreeBlock>();

/// Blocks and the header gap in front of every allocation are multiples
/// of this many bytes, so a free block's base stays reconstructible from
/// its data pointer regardless of the layout's alignment.
const GRANULE: usize = 8;

fn round_up_granule(n: usize) -> usize {
    (n + GRANULE - 1) & !(GRANULE - 1)
}

#[repr(C)]
struct FreeBlock {
    size: usize,
    next: Option<NonNull<FreeBlock>>,
}

struct Slob {
    head: Option<NonNull<FreeBlock>>,
    allocated_bytes: usize,
    peak_bytes: usize,
}

// SAFETY: always accessed behind the outer Mutex.
unsafe impl Send for Slob {}

impl Slob {
    const fn empty() -> Self {
        Self {
            head: None,
            allocated_bytes: 0,
            peak_bytes: 0,
        }
    }

    /// # Safety
    /// `start..start+size` must be unused, writable memory, and this
    /// must run exactly once before any allocation.
    unsafe fn init(&mut self, start: *mut u8, size: usize) {
        let block = start.cast::<FreeBlock>();
        // SAFETY: caller guarantees the region is valid and unused.
        unsafe {
            block.write(FreeBlock { size, next: None });
        }
        self.head = NonNull::new(block);
    }

    fn align_up(addr: usize, align: usize) -> usize {
        (addr + align - 1) & !(align - 1)
    }

    fn alloc(&mut self, layout: Layout) -> *mut u8 {
        let want = round_up_granule(layout.size().max(MIN_BLOCK));
        let align = layout.align().max(core::mem::align_of::<FreeBlock>());
        debug_assert!(align <= GRANULE, "SLOB only supports alignment up to the granule");

        let mut prev: Option<NonNull<FreeBlock>> = None;
        let mut cursor = self.head;

        while let Some(mut block) = cursor {
            // SAFETY: every block on the list is a live FreeBlock header.
            let block_ref = unsafe { block.as_mut() };
            let base = block.as_ptr() as usize;
            // The header gap is always a full granule, not just
            // size_of::<usize>(), so `dealloc` can reconstruct `base` from
            // the returned pointer without knowing the layout's alignment.
            let data_start = Self::align_up(base + GRANULE, align);
            let slack = data_start - base;

            if block_ref.size >= slack + want {
                let remaining = block_ref.size - slack - want;
                let next = block_ref.next;

                if remaining >= MIN_BLOCK {
                    // SAFETY: the tail of this block is unused space we're
                    // carving a fresh free block out of.
                    unsafe {
                        let tail = (data_start + want) as *mut FreeBlock;
                        tail.write(FreeBlock {
                            size: remaining,
                            next,
                        });
                        self.replace(prev, cursor, NonNull::new(tail));
                    }
                } else {
                    self.replace(prev, cursor, next);
                }

                self.allocated_bytes += want;
                self.peak_bytes = self.peak_bytes.max(self.allocated_bytes);
                return data_start as *mut u8;
            }

            prev = cursor;
            cursor = block_ref.next;
        }

        core::ptr::null_mut()
    }

    fn replace(
        &mut self,
        prev: Option<NonNull<FreeBlock>>,
        target: Option<NonNull<FreeBlock>>,
        with: Option<NonNull<FreeBlock>>,
    ) {
        match prev {
            None => self.head = with,
            Some(mut p) => {
                debug_assert!(unsafe { p.as_ref().next } == target);
                // SAFETY: p is a live list node.
                unsafe { p.as_mut().next = with };
            }
        }
    }

    /// Insert the freed block in address order and merge it with whichever
    /// neighbor(s) it's physically adjacent to, so the free list never
    /// accumulates more fragments than the allocation pattern actually
    /// needs.
    fn dealloc(&mut self, ptr: *mut u8, layout: Layout) {
        let want = round_up_granule(layout.size().max(MIN_BLOCK));
        let header = (ptr as usize - GRANULE) as *mut FreeBlock;
        let freed_addr = header as usize;

        let mut prev: Option<NonNull<FreeBlock>> = None;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            if block.as_ptr() as usize > freed_addr {
                break;
            }
            // SAFETY: every block on the list is a live FreeBlock header.
            let next = unsafe { block.as_ref().next };
            prev = cursor;
            cursor = next;
        }

        // SAFETY: header precedes every pointer `alloc` returned, by
        // exactly size_of::<usize>, and points at writable heap memory.
        unsafe {
            header.write(FreeBlock {
                size: want,
                next: cursor,
            });
        }
        let mut node = NonNull::new(header).unwrap();
        self.replace(prev, cursor, Some(node));

        // Merge with the following neighbor first so the node's `next`
        // pointer is settled before we potentially fold it into `prev`.
        if let Some(next) = cursor {
            // SAFETY: both blocks are live list nodes.
            let node_size = unsafe { node.as_ref().size };
            if freed_addr + node_size == next.as_ptr() as usize {
                // SAFETY: contiguous, neither currently referenced
                // elsewhere.
                unsafe {
                    let merged_next = next.as_ref().next;
                    node.as_mut().size = node_size + next.as_ref().size;
                    node.as_mut().next = merged_next;
                }
            }
        }

        if let Some(mut p) = prev {
            let p_addr = p.as_ptr() as usize;
            // SAFETY: p is a live list node whose `next` we just set to
            // `node` above.
            let p_size = unsafe { p.as_ref().size };
            if p_addr + p_size == node.as_ptr() as usize {
                unsafe {
                    let node_size = node.as_ref().size;
                    let node_next = node.as_ref().next;
                    p.as_mut().size = p_size + node_size;
                    p.as_mut().next = node_next;
                }
            }
        }

        self.allocated_bytes = self.allocated_bytes.saturating_sub(want);
    }
}

/// Global allocator: the `#[global_allocator]` for this kernel.
pub struct KernelAllocator {
    inner: Mutex<Slob>,
}

impl KernelAllocator {
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(Slob::empty()),
        }
    }

    pub fn stats(&self) -> HeapStats {
        let slob = self.inner.lock();
        HeapStats {
            allocated_bytes: slob.allocated_bytes,
            peak_bytes: slob.peak_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    pub allocated_bytes: usize,
    pub peak_bytes: usize,
}

// SAFETY: alloc/dealloc delegate to Slob under a lock; the returned
// pointer is always either null or a live, properly aligned allocation
// carved from HEAP_MEMORY.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner.lock().alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.lock().dealloc(ptr, layout);
    }
}

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator::empty();

/// Initialize the kernel heap over the static backing array.
pub fn init() {
    #[cfg(target_os = "none")]
    {
        // SAFETY: runs once during boot, before any allocation.
        unsafe {
            let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
            ALLOCATOR.inner.lock().init(start, HEAP_SIZE);
        }
        log::info!("kernel heap initialized: {} KiB", HEAP_SIZE / 1024);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate std;

    use super::*;

    fn backed(size: usize) -> KernelAllocator {
        let allocator = KernelAllocator::empty();
        let backing = std::vec![0u8; size].leak();
        unsafe {
            allocator.inner.lock().init(backing.as_mut_ptr(), backing.len());
        }
        allocator
    }

    #[test]
    fn alloc_and_dealloc_reuses_space() {
        let allocator = backed(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = unsafe { allocator.alloc(layout) };
        assert!(!a.is_null());
        unsafe { allocator.dealloc(a, layout) };
        let b = unsafe { allocator.alloc(layout) };
        assert_eq!(a, b);
    }

    #[test]
    fn exhausts_and_reports_null() {
        let allocator = backed(256);
        let layout = Layout::from_size_align(1024, 8).unwrap();
        let p = unsafe { allocator.alloc(layout) };
        assert!(p.is_null());
    }

    #[test]
    fn tracks_allocated_bytes() {
        let allocator = backed(4096);
        let layout = Layout::from_size_align(128, 8).unwrap();
        let before = allocator.stats().allocated_bytes;
        let p = unsafe { allocator.alloc(layout) };
        assert!(allocator.stats().allocated_bytes > before);
        unsafe { allocator.dealloc(p, layout) };
    }

    /// Freeing three adjacent blocks out of address order must still
    /// leave one block spanning the whole region: the free list merges
    /// on every dealloc rather than only with its immediate predecessor.
    #[test]
    fn out_of_order_frees_merge_into_one_block() {
        let allocator = backed(4096);
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = unsafe { allocator.alloc(layout) };
        let b = unsafe { allocator.alloc(layout) };
        let c = unsafe { allocator.alloc(layout) };
        unsafe {
            allocator.dealloc(c, layout);
            allocator.dealloc(a, layout);
            allocator.dealloc(b, layout);
        }
        let big = Layout::from_size_align(4096 - 256, 8).unwrap();
        assert!(!unsafe { allocator.alloc(big) }.is_null());
    }

    /// Sizes that aren't multiples of the granule must still leave every
    /// block base on a granule boundary, or `dealloc`'s `ptr - GRANULE`
    /// header recovery lands on the wrong address.
    #[test]
    fn odd_sized_allocations_round_to_the_granule() {
        let allocator = backed(4096);
        let a = unsafe { allocator.alloc(Layout::from_size_align(1, 1).unwrap()) };
        let b = unsafe { allocator.alloc(Layout::from_size_align(3, 1).unwrap()) };
        let c = unsafe { allocator.alloc(Layout::from_size_align(5, 1).unwrap()) };
        assert!(!a.is_null() && !b.is_null() && !c.is_null());
        assert_eq!((b as usize - a as usize) % GRANULE, 0);
        assert_eq!((c as usize - b as usize) % GRANULE, 0);
        unsafe {
            allocator.dealloc(a, Layout::from_size_align(1, 1).unwrap());
            allocator.dealloc(b, Layout::from_size_align(3, 1).unwrap());
        }
        let reused = unsafe { allocator.alloc(Layout::from_size_align(7, 1).unwrap()) };
        assert!(!reused.is_null());
    }

    #[test]
    fn free_list_stays_sorted_by_address_under_mixed_traffic() {
        let allocator = backed(64 * 1024);
        let mut live = std::vec::Vec::new();
        for i in 0..200usize {
            let size = 8 + (i * 37) % 512;
            let layout = Layout::from_size_align(size, 8).unwrap();
            let p = unsafe { allocator.alloc(layout) };
            if !p.is_null() {
                live.push((p, layout));
            }
            if i % 3 == 0 {
                if let Some((p, layout)) = live.pop() {
                    unsafe { allocator.dealloc(p, layout) };
                }
            }
        }
        let mut addr = 0usize;
        let mut cursor = allocator.inner.lock().head;
        while let Some(block) = cursor {
            let a = block.as_ptr() as usize;
            assert!(a >= addr, "free list out of address order");
            addr = a;
            cursor = unsafe { block.as_ref().next };
        }
    }
}
