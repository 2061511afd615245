//! Binary entry stub. The real entry point is [`cortex_kernel::arch::arm32::boot::_start`],
//! pulled in by linking against the library; this file exists only so
//! `cargo build` produces a standalone ELF image.

#![no_std]
#![no_main]

extern crate cortex_kernel;
