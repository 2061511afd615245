//! RAII IRQ-masking critical section.
//!
//! Mirrors the disable/restore pattern used throughout the kernel for
//! short critical sections (runqueue manipulation, allocator free-list
//! updates) that must not be preempted by a tick or device interrupt.

use super::{disable_irq_save, restore_irq};

/// While alive, IRQs are masked on this core. Restores the CPSR `I` bit
/// to whatever it was before construction, so nested guards are safe.
pub struct IrqGuard {
    saved_cpsr: u32,
}

impl IrqGuard {
    /// Disable IRQs and return a guard that restores the previous state
    /// on drop.
    pub fn new() -> Self {
        // SAFETY: the returned value is restored exactly once, by this
        // guard's Drop impl.
        let saved_cpsr = unsafe { disable_irq_save() };
        Self { saved_cpsr }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        // SAFETY: saved_cpsr was captured by this same guard's constructor.
        unsafe { restore_irq(self.saved_cpsr) };
    }
}
