//! Reset entry point, exception vector table, and early MMU bring-up.
//!
//! Execution starts at [`_start`] with the MMU off and a single identity
//! mapping covering the bootloader-supplied RAM. `_start` sets up the
//! boot stack, builds a minimal L1 table (kernel space at
//! [`KERNEL_START`], identity-mapped low RAM for the transition), enables
//! the MMU and caches, then jumps into [`kernel_main`].

use core::arch::{asm, global_asm};

use crate::arch::arm32::{context::TrapFrame, mmu};
use crate::mm::page_table::KernelL1Table;
use crate::mm::{PhysicalAddress, VirtualAddress};

/// Virtual address the kernel image is linked at.
pub const KERNEL_START: usize = 0x8000_0000;
/// `virt - phys` for every kernel mapping (kernel is offset-mapped, not
/// identity-mapped, so low physical RAM stays free for user space).
pub const KERNEL_OFFSET: usize = 0x6000_0000;

const BOOT_STACK_SIZE: usize = 16 * 1024;

#[unsafe(link_section = ".bss.stack")]
static mut BOOT_STACK: [u8; BOOT_STACK_SIZE] = [0; BOOT_STACK_SIZE];

#[unsafe(link_section = ".data.page_table")]
static mut BOOT_L1: KernelL1Table = KernelL1Table::empty();

/// `link.ld` places this whole image at [`KERNEL_START`], but the
/// bootloader loads and jumps to it at its physical counterpart
/// `KERNEL_START - KERNEL_OFFSET`, with the MMU off. Every `static`'s
/// address the compiler bakes in is therefore a *linked* address that
/// isn't valid memory yet; this converts one back to the physical
/// address actually holding those bytes right now.
const fn phys_of(linked: u32) -> u32 {
    linked - KERNEL_OFFSET as u32
}

/// Identity-map low RAM and map the kernel at [`KERNEL_START`] using
/// 1MiB sections, both pointing at the same physical backing: the
/// identity half keeps the current (pre-MMU) PC and SP valid the instant
/// the MMU turns on, the high half is what every ordinary Rust static
/// and function reference after that point actually means.
///
/// # Safety
/// Must run with the MMU off, exactly once, before [`enable_mmu`].
unsafe fn init_boot_page_table(ram_base: u32, ram_mb: u32) {
    // SAFETY: BOOT_L1's *linked* address isn't backed by real memory yet
    // (the MMU is off and nothing maps it); `phys_of` recovers the
    // physical address the bootloader actually placed these bytes at.
    let table =
        unsafe { &mut *(phys_of(core::ptr::addr_of_mut!(BOOT_L1) as u32) as *mut KernelL1Table) };
    for i in 0..ram_mb {
        let phys = PhysicalAddress::new(ram_base + i * 0x0010_0000);
        table.map_section(
            VirtualAddress::new(ram_base + i * 0x0010_0000),
            phys,
            mmu::section_ap::FULL_ACCESS,
            mmu::section_mem::WRITE_BACK,
        );
        table.map_section(
            VirtualAddress::new(KERNEL_START as u32 + i * 0x0010_0000),
            phys,
            mmu::section_ap::FULL_ACCESS,
            mmu::section_mem::WRITE_BACK,
        );
    }
}

/// # Safety
/// Must run after [`init_boot_page_table`], with the MMU still off.
unsafe fn enable_mmu() {
    // SAFETY: table is fully populated by `init_boot_page_table` before
    // this runs; DACR grants the kernel domain client access so section
    // AP bits are enforced rather than ignored. The kernel half lives
    // behind TTBR1 (see arch::arm32::mmu::TTBR_SPLIT); TTBR0 is left
    // unprogrammed here and set per-process once the scheduler exists.
    // TTBR1 takes a physical pointer, same reasoning as `phys_of` above.
    unsafe {
        mmu::set_dacr(mmu::DOMAIN_CLIENT << (mmu::DOMAIN_KERNEL * 2));
        mmu::set_ttbcr_split();
        mmu::set_ttbr1(PhysicalAddress::new(phys_of(
            core::ptr::addr_of!(BOOT_L1) as u32,
        )));
        let mut sctlr: u32;
        asm!("mrc p15, 0, {0}, c1, c0, 0", out(reg) sctlr, options(nostack, preserves_flags));
        sctlr |= 1 << 0; // M: MMU enable
        sctlr |= 1 << 2; // C: data cache enable
        sctlr |= 1 << 12; // I: instruction cache enable
        asm!("mcr p15, 0, {0}, c1, c0, 0", in(reg) sctlr, options(nostack, preserves_flags));
    }
    crate::arch::barriers::instruction_sync_barrier();
}

/// Entry point from reset, installed at the image's `.text.boot`.
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.boot")]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        // {stack} is this image's *linked* address for BOOT_STACK; the
        // MMU is off, so the bytes are actually at `linked - KERNEL_OFFSET`
        // (see `phys_of`) until `reset` maps the high half in.
        "ldr sp, ={stack} + {stack_size}",
        "ldr r0, ={offset}",
        "sub sp, sp, r0",
        "bl {reset}",
        "1: b 1b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        offset = const KERNEL_OFFSET,
        reset = sym reset,
    )
}

/// Runs on the boot stack, with the MMU still off, in ARM state.
extern "C" fn reset() -> ! {
    // SAFETY: single-core, nothing else touches these statics before the
    // MMU (and with it, scheduling) is live.
    unsafe {
        init_boot_page_table(0x2000_0000, 128);
        enable_mmu();
        install_vector_table();
    }
    crate::bootstrap::kernel_main()
}

/// Point VBAR at our vector table (all vectors are `ldr pc, [pc, #24]`
/// loads from the literal pool immediately following the table).
unsafe fn install_vector_table() {
    extern "C" {
        static arm32_vectors: u8;
    }
    // SAFETY: arm32_vectors is a valid code address emitted by the
    // global_asm! block below; VBAR only affects exception dispatch.
    unsafe {
        let addr = core::ptr::addr_of!(arm32_vectors) as u32;
        asm!("mcr p15, 0, {0}, c12, c0, 0", in(reg) addr, options(nostack, preserves_flags));
    }
}

global_asm!(
    r#"
.section .text.vectors, "ax"
.global arm32_vectors
.align 5
arm32_vectors:
    ldr pc, =reset_vector
    ldr pc, =undef_vector
    ldr pc, =svc_vector
    ldr pc, =prefetch_abort_vector
    ldr pc, =data_abort_vector
    b .
    ldr pc, =irq_vector
    ldr pc, =fiq_vector
reset_vector: b reset_vector

.macro trap_entry handler
    sub lr, lr, #0
    srsdb sp!, #0x13
    push {{r0-r12, lr}}
    mov r0, sp
    bl \handler
    pop {{r0-r12, lr}}
    rfeia sp!
.endm

undef_vector:
    trap_entry arm32_undef_handler
svc_vector:
    trap_entry arm32_svc_handler
prefetch_abort_vector:
    trap_entry arm32_prefetch_handler
data_abort_vector:
    trap_entry arm32_data_abort_handler
irq_vector:
    trap_entry arm32_irq_handler
fiq_vector:
    b fiq_vector
"#
);

#[unsafe(no_mangle)]
extern "C" fn arm32_undef_handler(_frame: *mut TrapFrame) {
    crate::arch::arm32::context::fpu_trap();
}

#[unsafe(no_mangle)]
extern "C" fn arm32_svc_handler(frame: *mut TrapFrame) {
    // SAFETY: frame was just built by the `trap_entry` stub above from a
    // live SVC exception and remains valid for the duration of this call.
    let frame = unsafe { &mut *frame };
    // SAFETY: pc points just past the `svc` instruction that trapped here.
    let svc = unsafe { frame.svc_number() };
    frame.r0 = crate::syscall::dispatch(svc, frame.r0, frame.r1, frame.r2, frame.r3, frame.cpsr);
}

#[unsafe(no_mangle)]
extern "C" fn arm32_prefetch_handler(frame: *mut TrapFrame) {
    // SAFETY: see arm32_svc_handler.
    let frame = unsafe { &*frame };
    panic!("prefetch abort at pc=0x{:x}", frame.pc);
}

#[unsafe(no_mangle)]
extern "C" fn arm32_data_abort_handler(frame: *mut TrapFrame) {
    // SAFETY: see arm32_svc_handler.
    let frame = unsafe { &*frame };
    panic!("data abort at pc=0x{:x}", frame.pc);
}

#[unsafe(no_mangle)]
extern "C" fn arm32_irq_handler(_frame: *mut TrapFrame) {
    crate::arch::arm32::timer::on_tick();
}
