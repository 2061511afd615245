//! Per-process address spaces.
//!
//! An [`AddressSpace`] owns a process's TTBR0 table, the list of frames
//! mapped into it, and the virtual bounds of its code/data, heap, and
//! stack regions. One is created per process (never per thread: extra
//! threads in the same process share their leader's `AddressSpace`).

use alloc::vec::Vec;

use crate::arch::arm32::mmu;
use crate::error::{KernelError, KernelResult};
use crate::mm::frame::{self, FrameNumber};
use crate::mm::page_table::{L1Table, L2Host};
use crate::mm::{PhysicalAddress, VirtualAddress, PAGE_SIZE};

/// `L1Table` is 8 KiB; two contiguous frames give it the 8192-byte
/// alignment the hardware requires without relying on the kernel heap,
/// which only guarantees 8-byte alignment.
const L1_FRAMES: u32 = 2;

/// Default user stack: 16 KiB, mapped immediately below the TTBR0/TTBR1
/// split so it sits at the top of the user half.
const DEFAULT_STACK_PAGES: u32 = 4;

pub struct AddressSpace {
    l1_frame: FrameNumber,
    l2_host: L2Host,
    /// Every frame mapped into this space, owned here so [`destroy`]
    /// can free them regardless of which region they back.
    ///
    /// [`destroy`]: AddressSpace::destroy
    pages: Vec<FrameNumber>,
    code_start: VirtualAddress,
    code_end: VirtualAddress,
    heap_start: VirtualAddress,
    heap_end: VirtualAddress,
    stack_start: VirtualAddress,
    stack_end: VirtualAddress,
}

impl AddressSpace {
    /// Create a fresh address space with an empty heap positioned right
    /// after `code_end`, and a default-sized user stack mapped at the
    /// top of the user half.
    pub fn new(code_start: VirtualAddress, code_end: VirtualAddress) -> KernelResult<Self> {
        let l1_frame = frame::alloc_contiguous(L1_FRAMES)?;
        zero_frames(l1_frame, L1_FRAMES);

        let heap_start = VirtualAddress::new(round_up_page(code_end.as_u32()));
        let stack_end = VirtualAddress::new(mmu::TTBR_SPLIT);
        let stack_start = VirtualAddress::new(stack_end.as_u32() - DEFAULT_STACK_PAGES * PAGE_SIZE as u32);

        let mut space = Self {
            l1_frame,
            l2_host: L2Host::new(),
            pages: Vec::new(),
            code_start,
            code_end,
            heap_start,
            heap_end: heap_start,
            stack_start,
            stack_end,
        };

        for i in 0..DEFAULT_STACK_PAGES {
            let page = frame::alloc().inspect_err(|_| space.destroy())?;
            space.pages.push(page);
            let virt = VirtualAddress::new(stack_start.as_u32() + i * PAGE_SIZE as u32);
            l1_table(l1_frame)
                .map_page(
                    virt,
                    page.addr(),
                    mmu::page_ap::FULL_ACCESS,
                    mmu::section_mem::WRITE_BACK,
                    true,
                    &mut space.l2_host,
                )
                .inspect_err(|_| space.destroy())?;
        }

        Ok(space)
    }

    /// Physical base of this space's 8 KiB TTBR0 table.
    pub fn ttbr0(&self) -> PhysicalAddress {
        self.l1_frame.addr()
    }

    pub fn stack_top(&self) -> VirtualAddress {
        self.stack_end
    }

    /// Map a single already-allocated frame into this space. The caller
    /// retains no other reference to `frame`; ownership (and the
    /// responsibility to free it on teardown) passes to this space.
    pub fn map_page(
        &mut self,
        virt: VirtualAddress,
        frame: FrameNumber,
        ap: u32,
        xn: bool,
    ) -> KernelResult<()> {
        l1_table(self.l1_frame).map_page(
            virt,
            frame.addr(),
            ap,
            mmu::section_mem::WRITE_BACK,
            xn,
            &mut self.l2_host,
        )?;
        self.pages.push(frame);
        Ok(())
    }

    /// Grow or query the heap break, mirroring the classic `sbrk`
    /// contract: `bytes == 0` just returns the current break, a
    /// positive amount maps fresh pages and advances it, a negative
    /// amount is rejected (this kernel never shrinks the heap back
    /// below what it has already mapped).
    pub fn sbrk(&mut self, bytes: i32) -> KernelResult<VirtualAddress> {
        if bytes == 0 {
            return Ok(self.heap_end);
        }
        if bytes < 0 {
            return Err(KernelError::InvalidArgument {
                what: "sbrk does not support shrinking the heap",
            });
        }

        let old_end = self.heap_end;
        let new_end = old_end.as_u32() + bytes as u32;
        let mut cursor = round_down_page(old_end.as_u32());
        while cursor < new_end {
            let frame = frame::alloc()?;
            self.map_page(
                VirtualAddress::new(cursor),
                frame,
                mmu::page_ap::FULL_ACCESS,
                true,
            )?;
            cursor += PAGE_SIZE as u32;
        }
        self.heap_end = VirtualAddress::new(new_end);
        Ok(old_end)
    }

    pub fn code_bounds(&self) -> (VirtualAddress, VirtualAddress) {
        (self.code_start, self.code_end)
    }

    pub fn heap_bounds(&self) -> (VirtualAddress, VirtualAddress) {
        (self.heap_start, self.heap_end)
    }

    pub fn stack_bounds(&self) -> (VirtualAddress, VirtualAddress) {
        (self.stack_start, self.stack_end)
    }

    /// Free every frame this space owns: mapped pages, L2 table hosts,
    /// and the L1 table itself. The caller must ensure no thread is
    /// still running with this space's TTBR0 installed.
    pub fn destroy(&mut self) {
        for page in self.pages.drain(..) {
            frame::free(page);
        }
        self.l2_host.teardown();
        frame::free_contiguous(self.l1_frame, L1_FRAMES);
        mmu::tlb_invalidate_all();
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Borrow a space's L1 table for the duration of a single call. Takes the
/// frame by value (it's `Copy`) rather than `&AddressSpace` so callers
/// can hold this alongside a `&mut` borrow of another field, e.g.
/// `self.l2_host`, without the borrow checker seeing an alias.
fn l1_table(frame: FrameNumber) -> &'static mut L1Table {
    // SAFETY: frame was allocated as `L1_FRAMES` contiguous, zeroed
    // frames by `AddressSpace::new` and is exclusively owned by the
    // address space that holds it for that space's whole lifetime.
    unsafe { &mut *(frame.addr().as_usize() as *mut L1Table) }
}

fn round_up_page(addr: u32) -> u32 {
    (addr + PAGE_SIZE as u32 - 1) & !(PAGE_SIZE as u32 - 1)
}

fn round_down_page(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

fn zero_frames(first: FrameNumber, count: u32) {
    // SAFETY: frames were just allocated and are not yet referenced by
    // any live mapping.
    unsafe {
        core::ptr::write_bytes(
            first.addr().as_usize() as *mut u8,
            0,
            count as usize * PAGE_SIZE,
        );
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn with_test_heap<R>(f: impl FnOnce() -> R) -> R {
        let backing = alloc::boxed::Box::leak(alloc::vec![0u8; 16 * 1024 * 1024].into_boxed_slice());
        let base = PhysicalAddress::new(backing.as_ptr() as u32);
        // SAFETY: `backing` is a dedicated, leaked region used by no one
        // else for the duration of this test.
        unsafe { frame::init(base, backing.len()) };
        f()
    }

    #[test]
    fn sbrk_zero_returns_current_break_without_mapping() {
        with_test_heap(|| {
            let mut space = AddressSpace::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x1800))
                .expect("address space creation");
            let before = space.sbrk(0).unwrap();
            assert_eq!(before, space.heap_bounds().1);
            assert_eq!(before.as_u32(), round_up_page(0x1800));
        });
    }

    #[test]
    fn sbrk_advances_heap_end_by_requested_amount() {
        with_test_heap(|| {
            let mut space = AddressSpace::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x1000))
                .expect("address space creation");
            let start = space.sbrk(0).unwrap();
            let returned = space.sbrk(100).unwrap();
            assert_eq!(returned, start);
            assert_eq!(space.heap_bounds().1.as_u32(), start.as_u32() + 100);
        });
    }

    #[test]
    fn sbrk_rejects_negative_amounts() {
        with_test_heap(|| {
            let mut space = AddressSpace::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x1000))
                .expect("address space creation");
            assert!(space.sbrk(-1).is_err());
        });
    }

    #[test]
    fn stack_sits_directly_below_the_user_kernel_split() {
        with_test_heap(|| {
            let space = AddressSpace::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x1000))
                .expect("address space creation");
            assert_eq!(space.stack_top().as_u32(), mmu::TTBR_SPLIT);
        });
    }
}
