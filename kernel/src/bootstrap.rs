//! Kernel entry point reached from [`crate::arch::arm32::boot::reset`]
//! once the MMU, caches, and exception vectors are live.

use crate::arch::arm32::boot::KERNEL_OFFSET;

/// Total RAM the boot page table identity/offset-maps.
const RAM_BASE: u32 = 0x2000_0000;
const RAM_SIZE: u32 = 128 * 1024 * 1024;

extern "C" {
    static __kernel_end: u8;
}

/// Bring every subsystem up in dependency order, then hand off to the
/// scheduler. Never returns.
pub fn kernel_main() -> ! {
    crate::log_service::log_init();
    log::info!("boot: MMU and vectors live, bringing up kernel");

    // SAFETY: __kernel_end is a linker-provided symbol, not a real
    // object; its address (not its value) is the fact we want.
    let kernel_end_linked = unsafe { core::ptr::addr_of!(__kernel_end) as u32 };
    let kernel_end_phys = kernel_end_linked - KERNEL_OFFSET as u32;
    let free_base = kernel_end_phys.next_multiple_of(crate::mm::PAGE_SIZE as u32);
    let free_size = RAM_SIZE - (free_base - RAM_BASE);

    crate::mm::init(free_base, free_size);
    crate::irq::init();
    crate::process::init();
    crate::sched::init();

    log::info!("boot: handing off to scheduler");
    crate::sched::start();
}
