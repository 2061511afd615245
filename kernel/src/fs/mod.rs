//! Filesystem support: block device abstraction and a read-only FAT32
//! reader. No VFS layer, no writable filesystems, no mount table: this
//! kernel reads a single FAT32 partition to load what it needs and
//! nothing else.

pub mod blockdev;
pub mod fat32;

pub use blockdev::{BlockDevice, RamBlockDevice};
pub use fat32::{File, Partition};
