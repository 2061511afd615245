//! Architecture-independent IRQ abstraction layer.
//!
//! Delegates hardware operations to [`crate::arch::arm32::intc`] through
//! the [`IrqController`] seam, and keeps a small table of line handlers
//! for drivers that want to register their own (block device completion,
//! future UART RX) without the core timer/syscall paths going through
//! this indirection.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

/// Architecture-independent IRQ number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    pub const fn new(irq: u32) -> Self {
        Self(irq)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for IrqNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A handler registered against a specific IRQ line.
pub type IrqHandler = fn(IrqNumber);

/// Interrupt controller interface an architecture implements once, so the
/// rest of the kernel never names [`crate::arch::arm32::intc`] directly.
pub trait IrqController {
    fn enable(&self, irq: IrqNumber) -> KernelResult<()>;
    fn disable(&self, irq: IrqNumber) -> KernelResult<()>;
    fn acknowledge(&self, irq: IrqNumber) -> KernelResult<()>;
    fn eoi(&self, irq: IrqNumber) -> KernelResult<()>;
    /// 0 is highest priority, 7 is lowest, on this controller.
    fn set_priority(&self, irq: IrqNumber, priority: u8) -> KernelResult<()>;
    fn is_pending(&self, irq: IrqNumber) -> KernelResult<bool>;
}

const MAX_IRQ: u32 = crate::arch::arm32::intc::NUM_LINES;

struct IrqManager {
    #[cfg(feature = "alloc")]
    handlers: BTreeMap<u32, IrqHandler>,
    dispatch_count: u64,
}

impl IrqManager {
    fn new() -> Self {
        Self {
            #[cfg(feature = "alloc")]
            handlers: BTreeMap::new(),
            dispatch_count: 0,
        }
    }

    #[cfg(feature = "alloc")]
    fn register(&mut self, irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
        if irq.0 >= MAX_IRQ {
            return Err(KernelError::InvalidArgument {
                what: "IRQ number exceeds the controller's line count",
            });
        }
        if self.handlers.insert(irq.0, handler).is_some() {
            return Err(KernelError::InvalidArgument {
                what: "a handler is already registered for this IRQ",
            });
        }
        Ok(())
    }

    #[cfg(feature = "alloc")]
    fn dispatch(&mut self, irq: IrqNumber) {
        self.dispatch_count += 1;
        if let Some(&handler) = self.handlers.get(&irq.0) {
            handler(irq);
        }
    }
}

static IRQ_MANAGER: GlobalState<Mutex<IrqManager>> = GlobalState::new();

/// Bring up the IRQ manager. Must run after [`crate::arch::arm32::intc::init`].
pub fn init() {
    let _ = IRQ_MANAGER.init(Mutex::new(IrqManager::new()));
    log::info!("IRQ manager initialized");
}

#[cfg(feature = "alloc")]
pub fn register_handler(irq: IrqNumber, handler: IrqHandler) -> KernelResult<()> {
    IRQ_MANAGER
        .with_mut(|mgr| mgr.lock().register(irq, handler))
        .unwrap_or(Err(KernelError::Fatal {
            reason: "IRQ manager used before init",
        }))
}

#[cfg(feature = "alloc")]
pub fn dispatch(irq: IrqNumber) {
    IRQ_MANAGER.with_mut(|mgr| mgr.lock().dispatch(irq));
}

pub fn enable(irq: IrqNumber) -> KernelResult<()> {
    crate::arch::arm32::intc::enable(irq.as_u32())
}

pub fn disable(irq: IrqNumber) -> KernelResult<()> {
    crate::arch::arm32::intc::disable(irq.as_u32())
}

pub fn eoi(irq: IrqNumber) -> KernelResult<()> {
    crate::arch::arm32::intc::eoi(irq.as_u32())
}

pub fn set_priority(irq: IrqNumber, priority: u8) -> KernelResult<()> {
    crate::arch::arm32::intc::set_priority(irq.as_u32(), priority)
}

pub fn is_pending(irq: IrqNumber) -> KernelResult<bool> {
    crate::arch::arm32::intc::is_pending(irq.as_u32())
}

/// Interrupts dispatched through [`dispatch`] since init (excludes the
/// timer tick and SVC traps, which bypass this table).
pub fn dispatch_count() -> u64 {
    IRQ_MANAGER
        .with(|mgr| mgr.lock().dispatch_count)
        .unwrap_or(0)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn irq_number_roundtrips_through_u32() {
        let irq = IrqNumber::from(35);
        assert_eq!(irq.as_u32(), 35);
    }

    static LAST_HANDLED: AtomicU32 = AtomicU32::new(0);

    fn record_handler(irq: IrqNumber) {
        LAST_HANDLED.store(irq.as_u32(), Ordering::Relaxed);
    }

    #[test]
    fn dispatch_invokes_the_registered_handler_for_its_line() {
        let mut mgr = IrqManager::new();
        mgr.register(IrqNumber::new(7), record_handler).unwrap();
        mgr.dispatch(IrqNumber::new(7));
        assert_eq!(LAST_HANDLED.load(Ordering::Relaxed), 7);
        assert_eq!(mgr.dispatch_count, 1);
    }

    #[test]
    fn registering_twice_on_the_same_line_is_rejected() {
        let mut mgr = IrqManager::new();
        mgr.register(IrqNumber::new(1), record_handler).unwrap();
        assert!(mgr.register(IrqNumber::new(1), record_handler).is_err());
    }

    /// A test-only controller is the polymorphic use of [`IrqController`]
    /// this seam exists for: the rest of the kernel only ever sees the
    /// trait, never [`crate::arch::arm32::intc::Arm32IrqController`]
    /// directly, so a mock like this one can stand in for real hardware.
    struct MockController {
        enabled: core::cell::Cell<bool>,
    }

    impl IrqController for MockController {
        fn enable(&self, _irq: IrqNumber) -> KernelResult<()> {
            self.enabled.set(true);
            Ok(())
        }
        fn disable(&self, _irq: IrqNumber) -> KernelResult<()> {
            self.enabled.set(false);
            Ok(())
        }
        fn acknowledge(&self, _irq: IrqNumber) -> KernelResult<()> {
            Ok(())
        }
        fn eoi(&self, _irq: IrqNumber) -> KernelResult<()> {
            Ok(())
        }
        fn set_priority(&self, _irq: IrqNumber, priority: u8) -> KernelResult<()> {
            if priority > 7 {
                return Err(KernelError::InvalidArgument {
                    what: "interrupt priority must be 0..=7",
                });
            }
            Ok(())
        }
        fn is_pending(&self, _irq: IrqNumber) -> KernelResult<bool> {
            Ok(false)
        }
    }

    fn drive(controller: &dyn IrqController, irq: IrqNumber) {
        controller.enable(irq).unwrap();
    }

    #[test]
    fn generic_code_drives_any_irq_controller_through_the_trait() {
        let mock = MockController {
            enabled: core::cell::Cell::new(false),
        };
        drive(&mock, IrqNumber::new(3));
        assert!(mock.enabled.get());
    }
}
