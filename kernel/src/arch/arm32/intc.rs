//! Vectored interrupt controller driver.
//!
//! Generalizes a two-bank (secure/non-secure) vectored interrupt
//! controller: a "select" register chooses the line the following writes
//! apply to, one-shot enable/disable/clear/force registers, a priority
//! field packed into the source mode register, and an end-of-interrupt
//! register that must be written once per accepted interrupt. Only the
//! non-secure bank is used; this kernel never runs in a secure world.
//!
//! Stored behind [`GlobalState`] rather than [`crate::sync::once_lock::LazyLock`]
//! because the controller must be brought up before the heap exists.

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    irq::IrqController,
    sync::once_lock::GlobalState,
};

/// Number of interrupt lines implemented by this controller.
pub const NUM_LINES: u32 = 32;

const SSR: usize = 0x10;
const IECR: usize = 0x24;
const IDCR: usize = 0x28;
const ICCR: usize = 0x38;
const ISCR: usize = 0x3C;
const IPR: usize = 0x40;
const SMR_BASE: usize = 0x4000;
const EOICR: usize = 0x130;

struct Controller {
    base: usize,
}

impl Controller {
    fn select(&self, line: u32) {
        // SAFETY: `base` is the controller's fixed MMIO region; SSR only
        // selects which line subsequent accesses target.
        unsafe { core::ptr::write_volatile((self.base + SSR) as *mut u32, line) }
    }

    fn reg_write(&self, offset: usize, value: u32) {
        // SAFETY: offset is one of the controller's documented registers,
        // always used after `select` has targeted the intended line.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn reg_read(&self, offset: usize) -> u32 {
        // SAFETY: read-only status access to a fixed MMIO register.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn enable(&self, line: u32) {
        self.select(line);
        self.reg_write(IECR, 1);
    }

    fn disable(&self, line: u32) {
        self.select(line);
        self.reg_write(IDCR, 1);
    }

    fn acknowledge(&self, line: u32) {
        self.select(line);
        self.reg_write(ICCR, 1);
    }

    fn eoi(&self) {
        self.reg_write(EOICR, 0);
    }

    fn set_priority(&self, line: u32, priority: u8) {
        self.select(line);
        let current = self.reg_read(SMR_BASE + (line as usize) * 4);
        self.reg_write(SMR_BASE + (line as usize) * 4, (current & !0b111) | (priority as u32 & 0b111));
    }

    fn is_pending(&self, line: u32) -> bool {
        self.reg_read(IPR) & (1 << line) != 0
    }
}

static CONTROLLER: GlobalState<Mutex<Controller>> = GlobalState::new();

/// Physical base of the non-secure controller bank.
pub const BASE_ADDR: usize = 0xFFFF_F000;

/// Bring up the interrupt controller: mask every line and acknowledge any
/// interrupts left pending by the bootloader. Must run before [`crate::irq::init`].
pub fn init() {
    let controller = Controller { base: BASE_ADDR };
    for line in 0..NUM_LINES {
        controller.disable(line);
        controller.acknowledge(line);
    }
    controller.eoi();
    let _ = CONTROLLER.init(Mutex::new(controller));
}

fn with_controller<F: FnOnce(&Controller) -> KernelResult<()>>(f: F) -> KernelResult<()> {
    CONTROLLER
        .with(|lock| f(&lock.lock()))
        .unwrap_or(Err(KernelError::Fatal {
            reason: "interrupt controller used before init",
        }))
}

pub fn enable(irq: u32) -> KernelResult<()> {
    with_controller(|c| {
        c.enable(irq);
        Ok(())
    })
}

pub fn disable(irq: u32) -> KernelResult<()> {
    with_controller(|c| {
        c.disable(irq);
        Ok(())
    })
}

pub fn eoi(irq: u32) -> KernelResult<()> {
    with_controller(|c| {
        c.acknowledge(irq);
        c.eoi();
        Ok(())
    })
}

pub fn set_priority(irq: u32, priority: u8) -> KernelResult<()> {
    if priority > 7 {
        return Err(KernelError::InvalidArgument {
            what: "interrupt priority must be 0..=7",
        });
    }
    with_controller(|c| {
        c.set_priority(irq, priority);
        Ok(())
    })
}

pub fn is_pending(irq: u32) -> KernelResult<bool> {
    CONTROLLER
        .with(|lock| Ok(lock.lock().is_pending(irq)))
        .unwrap_or(Err(KernelError::Fatal {
            reason: "interrupt controller used before init",
        }))
}

/// Handle to the controller conforming to the architecture-independent
/// [`IrqController`] seam, for code that wants to be generic over the
/// controller rather than calling the free functions above directly.
pub struct Arm32IrqController;

impl IrqController for Arm32IrqController {
    fn enable(&self, irq: crate::irq::IrqNumber) -> KernelResult<()> {
        enable(irq.as_u32())
    }

    fn disable(&self, irq: crate::irq::IrqNumber) -> KernelResult<()> {
        disable(irq.as_u32())
    }

    fn acknowledge(&self, irq: crate::irq::IrqNumber) -> KernelResult<()> {
        with_controller(|c| {
            c.acknowledge(irq.as_u32());
            Ok(())
        })
    }

    fn eoi(&self, irq: crate::irq::IrqNumber) -> KernelResult<()> {
        eoi(irq.as_u32())
    }

    fn set_priority(&self, irq: crate::irq::IrqNumber, priority: u8) -> KernelResult<()> {
        set_priority(irq.as_u32(), priority)
    }

    fn is_pending(&self, irq: crate::irq::IrqNumber) -> KernelResult<bool> {
        is_pending(irq.as_u32())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::irq::{IrqController, IrqNumber};

    #[test]
    fn controller_reports_fatal_before_init_instead_of_touching_mmio() {
        let controller = Arm32IrqController;
        assert!(matches!(
            controller.enable(IrqNumber::new(35)),
            Err(KernelError::Fatal { .. })
        ));
    }
}
