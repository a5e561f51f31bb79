//! Kernel console logger
//!
//! Implements the `log` facade for the kernel. Every record is formatted
//! into a fixed-size line and kept in a bounded ring (the message buffer,
//! read back with [`dmesg`]). On hardware a sink such as a UART writer can be
//! attached with [`set_sink`]; lines are forwarded to it as they are logged.

use core::fmt::Write;

use heapless::{Deque, String};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Longest line kept in the message buffer; longer lines are truncated
pub const LINE_LEN: usize = 160;

/// Number of lines kept in the message buffer
pub const RING_LINES: usize = 64;

/// A single formatted log line
pub type Line = String<LINE_LEN>;

/// Output callback for formatted lines
pub type Sink = fn(&str);

struct Console {
    ring: Deque<Line, RING_LINES>,
    sink: Option<Sink>,
}

impl Console {
    const fn new() -> Self {
        Self {
            ring: Deque::new(),
            sink: None,
        }
    }

    fn push(&mut self, line: Line) {
        if let Some(sink) = self.sink {
            sink(line.as_str());
        }
        if self.ring.is_full() {
            self.ring.pop_front();
        }
        let _ = self.ring.push_back(line);
    }
}

static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// The kernel's `log` implementation
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = Line::new();
        // A full line just truncates the message
        let _ = write!(
            line,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        CONSOLE.lock().push(line);
    }

    fn flush(&self) {}
}

/// Install the kernel logger
///
/// Safe to call more than once; only the level changes after the first call.
pub fn init(level: LevelFilter) {
    // Fails only if a logger is already installed, which is fine
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Attach an output sink for formatted lines
pub fn set_sink(sink: Sink) {
    CONSOLE.lock().sink = Some(sink);
}

/// Copy out the message buffer, oldest line first
pub fn dmesg() -> alloc::vec::Vec<Line> {
    CONSOLE.lock().ring.iter().cloned().collect()
}

/// Drop all buffered lines
pub fn clear() {
    CONSOLE.lock().ring.clear();
}
