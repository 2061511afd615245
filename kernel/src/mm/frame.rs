//! Physical frame allocation.
//!
//! Frames back everything physical: page tables, thread kernel stacks,
//! and user pages. The allocator itself is a [`buddy::BuddyAllocator`];
//! this module owns its global instance and the book-keeping the buddy
//! allocator can't: an L2 page table is a quarter the size of a frame,
//! so three of them share one physical frame, tracked here with a small
//! occupancy bitmap per shared frame.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::{buddy::BuddyAllocator, PhysicalAddress};
use crate::sync::once_lock::GlobalState;

/// A physical frame number (frame index, not a byte address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub u32);

impl FrameNumber {
    pub const fn addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * super::PAGE_SIZE as u32)
    }
}

struct Allocator {
    buddy: BuddyAllocator,
}

static ALLOCATOR: GlobalState<Mutex<Allocator>> = GlobalState::new();

/// Bring up the frame allocator over `[base, base + size)`. The
/// order-tracking bitmap itself needs memory; this kernel carves it out
/// of the tail of the managed range before handing the rest to the
/// buddy allocator, since nothing else has allocated anything yet.
///
/// # Safety
/// Must run exactly once, before any other core or interrupt can
/// observe memory, and `[base, base + size)` must be RAM this kernel
/// exclusively owns (no bootloader structures, no kernel image).
pub unsafe fn init(base: PhysicalAddress, size: usize) {
    let frame_count = (size / super::PAGE_SIZE) as u32;
    let bitmap_bytes = frame_count as usize;
    let bitmap_frames = bitmap_bytes.div_ceil(super::PAGE_SIZE) as u32;
    let usable_frames = frame_count - bitmap_frames;

    let bitmap_base = base.as_u32() + usable_frames * super::PAGE_SIZE as u32;
    // SAFETY: caller guarantees this region is otherwise unused RAM;
    // bitmap_base..+bitmap_frames*PAGE_SIZE lies within it by construction.
    let order_of: &'static mut [i8] = unsafe {
        core::slice::from_raw_parts_mut(bitmap_base as *mut i8, usable_frames as usize)
    };

    // SAFETY: base..base+usable_frames*PAGE_SIZE is unused RAM per caller.
    let buddy = unsafe { BuddyAllocator::new(base.as_u32() / super::PAGE_SIZE as u32, usable_frames, order_of) };
    let _ = ALLOCATOR.init(Mutex::new(Allocator { buddy }));
    log::info!(
        "frame allocator: {} frames usable ({} reserved for bookkeeping)",
        usable_frames,
        bitmap_frames
    );
}

fn order_for(frames: u32) -> usize {
    let mut order = 0;
    while (1u32 << order) < frames {
        order += 1;
    }
    order
}

/// Allocate a single physical frame.
pub fn alloc() -> KernelResult<FrameNumber> {
    alloc_contiguous(1)
}

/// Allocate `count` physically contiguous frames (rounded up to the
/// next power of two internally; the caller gets exactly `count` back
/// logically but the allocator reserves the rounded block).
pub fn alloc_contiguous(count: u32) -> KernelResult<FrameNumber> {
    let order = order_for(count);
    ALLOCATOR
        .with(|lock| {
            lock.lock()
                .buddy
                .allocate(order)
                .map(FrameNumber)
                .ok_or(KernelError::OutOfMemory {
                    requested: count as usize * super::PAGE_SIZE,
                    available: 0,
                })
        })
        .unwrap_or(Err(KernelError::Fatal {
            reason: "frame allocator used before init",
        }))
}

/// Free a single frame previously returned by [`alloc`].
pub fn free(frame: FrameNumber) {
    free_contiguous(frame, 1);
}

/// Free `count` contiguous frames previously returned by [`alloc_contiguous`].
pub fn free_contiguous(frame: FrameNumber, count: u32) {
    let order = order_for(count);
    let _ = ALLOCATOR.with(|lock| {
        lock.lock().buddy.free(frame.0, order);
    });
}
