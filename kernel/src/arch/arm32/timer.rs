//! Periodic tick source.
//!
//! A single timer/counter channel running in waveform mode, reloading on
//! RC compare, driving a fixed-frequency tick IRQ. Each tick is the
//! scheduler's nominal 1000us quantum; [`TICKS`] is the monotonic count
//! the rest of the kernel reads as "now".

use core::sync::atomic::{AtomicU64, Ordering};

use crate::irq::IrqNumber;

const TC_BASE: usize = 0xF800_4000;
const CH0_CMR: usize = 0x00;
const CH0_CCR: usize = 0x08;
const CH0_SR: usize = 0x20;
const CH0_IER: usize = 0x24;
const CH0_RC: usize = 0x1C;

/// IRQ line the timer is wired to.
pub const TICK_IRQ: u32 = 35;

/// Waveform mode, reset on RC compare.
const CMR_WAVEFORM_RC: u32 = (1 << 15) | 3;
const CCR_CLKEN: u32 = 1 << 0;
const CCR_SWTRG: u32 = 1 << 2;
const IER_CPCS: u32 = 1 << 4;

static TICKS: AtomicU64 = AtomicU64::new(0);

fn reg_write(offset: usize, value: u32) {
    // SAFETY: TC_BASE is the fixed MMIO region of timer/counter channel 0.
    unsafe { core::ptr::write_volatile((TC_BASE + offset) as *mut u32, value) }
}

fn reg_read(offset: usize) -> u32 {
    // SAFETY: read-only status access to a fixed MMIO register.
    unsafe { core::ptr::read_volatile((TC_BASE + offset) as *const u32) }
}

/// Configure the channel to reload at `compare_value` counter ticks and
/// enable the controller's interrupt line, but do not start counting yet.
pub fn init(compare_value: u32) {
    reg_write(CH0_CMR, CMR_WAVEFORM_RC);
    reg_write(CH0_RC, compare_value);
    reg_write(CH0_IER, IER_CPCS);

    let _ = crate::arch::arm32::intc::set_priority(TICK_IRQ, 2);
    let _ = crate::arch::arm32::intc::enable(TICK_IRQ);
}

/// Start the counter.
pub fn start() {
    reg_write(CH0_CCR, CCR_CLKEN | CCR_SWTRG);
}

/// Called from the IRQ dispatch path when [`TICK_IRQ`] fires. Clears the
/// compare-match flag (read-to-clear), advances the tick counter, and
/// hands off to the scheduler.
pub fn on_tick() {
    let _ = reg_read(CH0_SR);
    TICKS.fetch_add(1, Ordering::Relaxed);
    let _ = crate::arch::arm32::intc::eoi(TICK_IRQ);
    crate::sched::on_tick();
}

/// Monotonic tick count since [`start`].
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// IRQ number this driver occupies, for registration with [`crate::irq`].
pub fn irq_number() -> IrqNumber {
    IrqNumber::new(TICK_IRQ)
}
