//! Structured kernel log service
//!
//! A fixed-size, heap-free circular buffer of log entries, installed as the
//! backing store for the [`log`] crate's global logger. Each entry carries
//! a tick timestamp, severity level, and a fixed-length message. The
//! service is stored as global state behind a [`spin::Mutex`].
//!
//! ```ignore
//! log_service::log_init();
//! log::info!("scheduler initialized");
//! let n = log_service::log_count();
//! ```
//!
//! The buffer holds up to [`LOG_BUFFER_CAPACITY`] entries. Once full it
//! wraps around and silently overwrites the oldest entries.

use log::{Level, Metadata, Record};
use spin::Mutex;

use crate::sync::once_lock::GlobalState;

/// Maximum number of log entries the circular buffer can hold.
const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a log message stored in a [`LogEntry`].
const LOG_MESSAGE_MAX_LEN: usize = 128;

/// A single log entry, stored inline so the buffer never touches the heap.
#[derive(Clone)]
pub struct LogEntry {
    /// Scheduler tick at which the entry was recorded.
    pub tick: u64,
    pub level: Level,
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            tick: 0,
            level: Level::Trace,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    pub fn message(&self) -> &str {
        let len = self.message_len as usize;
        core::str::from_utf8(&self.message_buf[..len]).unwrap_or("")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    count: usize,
}

impl LogBuffer {
    fn new() -> Self {
        const EMPTY: LogEntry = LogEntry::empty();
        Self {
            entries: [EMPTY; LOG_BUFFER_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY {
            0
        } else {
            self.head
        }
    }

    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        Some(&self.entries[(self.tail() + i) % LOG_BUFFER_CAPACITY])
    }
}

static LOG_BUFFER: GlobalState<Mutex<LogBuffer>> = GlobalState::new();

/// The [`log::Log`] implementation installed by [`log_init`].
struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let tick = crate::arch::timer::get_ticks();

        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        // A record's arguments are formatted into a fixed buffer via a
        // small io::Write-style cursor; overflow is truncated, not an error.
        let mut cursor = Cursor {
            buf: &mut message_buf,
            len: 0,
        };
        let _ = core::fmt::write(&mut cursor, *record.args());
        let message_len = cursor.len as u8;

        LOG_BUFFER.with(|lock| {
            lock.lock().push(LogEntry {
                tick,
                level: record.level(),
                message_buf,
                message_len,
            });
        });
    }

    fn flush(&self) {}
}

struct Cursor<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl core::fmt::Write for Cursor<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let remaining = self.buf.len() - self.len;
        let n = s.len().min(remaining);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

static LOGGER: KernelLogger = KernelLogger;

/// Initialize the kernel log service and install it as the global
/// [`log`] logger. Must be called exactly once during boot, before any
/// other subsystem that might call `log::info!` et al.
pub fn log_init() {
    let _ = LOG_BUFFER.init(Mutex::new(LogBuffer::new()));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

/// Iterate over all buffered log entries from oldest to newest.
pub fn log_drain<F: FnMut(&LogEntry)>(mut f: F) -> Option<usize> {
    LOG_BUFFER.with(|lock| {
        let buf = lock.lock();
        let n = buf.len();
        for i in 0..n {
            if let Some(entry) = buf.get(i) {
                f(entry);
            }
        }
        n
    })
}

/// Number of entries currently in the log buffer.
pub fn log_count() -> Option<usize> {
    LOG_BUFFER.with(|lock| lock.lock().len())
}

/// Clear all log entries.
pub fn log_clear() -> Option<()> {
    LOG_BUFFER.with(|lock| lock.lock().clear())
}
