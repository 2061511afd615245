//! Kernel error taxonomy
//!
//! A single error type shared across every subsystem so that `?` works
//! uniformly from the boot allocator down to the syscall dispatcher.

use core::fmt;

/// The kernel-wide error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A block device read or write failed.
    DiskError,
    /// The heap or a frame allocator could not satisfy a request.
    OutOfMemory { requested: usize, available: usize },
    /// The PID table has no free identifiers left.
    OutOfPid,
    /// A FAT32 partition failed BPB validation (bad signature, bad sector
    /// size, unsupported FAT size).
    BadFilesystem,
    /// Walked off the end of a cluster chain before expecting to.
    UnexpectedEndOfChain,
    /// Attempted to read past the end of a file's recorded size.
    UnexpectedEndOfFile,
    /// A caller-supplied argument failed validation.
    InvalidArgument { what: &'static str },
    /// An invariant the kernel cannot recover from was violated.
    Fatal { reason: &'static str },
}

/// Result type alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiskError => write!(f, "block device I/O error"),
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::OutOfPid => write!(f, "process id space exhausted"),
            Self::BadFilesystem => write!(f, "not a valid FAT32 filesystem"),
            Self::UnexpectedEndOfChain => write!(f, "cluster chain ended unexpectedly"),
            Self::UnexpectedEndOfFile => write!(f, "read past recorded end of file"),
            Self::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            Self::Fatal { reason } => write!(f, "fatal: {}", reason),
        }
    }
}

impl From<&'static str> for KernelError {
    fn from(reason: &'static str) -> Self {
        Self::Fatal { reason }
    }
}
