//! Architecture-independent timer interface.

/// A monotonic tick source. Lets scheduler logic that only needs "now,
/// in ticks" be tested against a fake clock instead of the real counter
/// channel, the same way [`crate::irq::IrqController`] decouples the
/// scheduler from the real interrupt controller.
pub trait TickSource {
    fn ticks(&self) -> u64;
}

/// The real counter channel backing [`get_ticks`].
pub struct Arm32TickSource;

impl TickSource for Arm32TickSource {
    fn ticks(&self) -> u64 {
        crate::arch::arm32::timer::get_ticks()
    }
}

/// Get current scheduler tick count (nominal 1000us quantum).
pub fn get_ticks() -> u64 {
    crate::arch::arm32::timer::get_ticks()
}

/// Get milliseconds elapsed since boot.
///
/// Each scheduler tick is a nominal 1000us quantum, so tick count and
/// millisecond count coincide.
pub fn get_timestamp_ms() -> u64 {
    crate::arch::arm32::timer::get_ticks()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    struct FakeClock(u64);

    impl TickSource for FakeClock {
        fn ticks(&self) -> u64 {
            self.0
        }
    }

    fn ms_since_boot(source: &dyn TickSource) -> u64 {
        source.ticks()
    }

    #[test]
    fn generic_code_reads_any_tick_source_through_the_trait() {
        let fake = FakeClock(42);
        assert_eq!(ms_since_boot(&fake), 42);
    }
}
