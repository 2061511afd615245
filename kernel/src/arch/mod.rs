//! Architecture layer.
//!
//! The kernel targets a single architecture, `armv7a-none-eabi`
//! (Cortex-A class, no hypervisor/security extensions assumed). All
//! hardware-facing code lives under [`arm32`]; the small facade modules
//! here ([`timer`], [`barriers`]) exist so the rest of the kernel never
//! writes `arch::arm32::` directly outside of boot/init code.

pub mod arm32;
pub mod barriers;
pub mod timer;

/// Park the CPU until the next interrupt. Used by the idle thread.
pub fn idle() {
    arm32::wfi();
}
