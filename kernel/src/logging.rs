//! `log` crate facade backed by the early console.
//!
//! Installed once during the `pre-mm` boot phase (see [`crate::boot`]), after
//! the command line has been parsed once for logging-relevant options (serial
//! enable, verbosity) but before parse errors are reported — mirroring the
//! two-phase cmdline handling spec §4.9 requires.

use crate::console;
use core::fmt::Write;
use log::{Level, Log, Metadata, Record};
use spin::Mutex;

struct KernelLogger {
    max_level: Mutex<Level>,
}

static LOGGER: KernelLogger = KernelLogger {
    max_level: Mutex::new(Level::Info),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *self.max_level.lock()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _ = write!(LineWriter, "[{:<5}] {}\n", record.level(), record.args());
    }

    fn flush(&self) {}
}

/// Zero-sized helper that forwards to the shared early console so we don't
/// need a second global buffer just for the logger.
struct LineWriter;

impl Write for LineWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        console::_print(format_args!("{s}"));
        Ok(())
    }
}

/// Install the kernel logger and set its level.
///
/// Idempotent-ish: calling this more than once just resets the level, since
/// `log::set_logger` itself may only succeed the first time.
pub fn init(level: Level) {
    *LOGGER.max_level.lock() = level;
    log::set_max_level(level.to_level_filter());
    // Ignore the error: in test builds on the host target this may be called
    // more than once across the test binary's lifetime.
    let _ = log::set_logger(&LOGGER);
}
