//! The kernel log sink. Records go to the serial port once one is attached.

use core::fmt::Write;

use log::LevelFilter;
use spin::{Mutex, Once};

use crate::serial::SerialWriter;

pub struct Console {
    serial: Mutex<Option<SerialWriter>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init() -> &'static Self {
        let console = DEFAULT.call_once(|| Console {
            serial: Mutex::new(None),
        });
        // A second install only happens if init runs twice; the first logger stays.
        if log::set_logger(console).is_ok() {
            log::set_max_level(max_level());
        }
        console
    }

    pub fn attach_serial(&self, serial: SerialWriter) {
        *self.serial.lock() = Some(serial);
    }
}

#[cfg(debug_assertions)]
fn max_level() -> LevelFilter {
    LevelFilter::Trace
}

#[cfg(not(debug_assertions))]
fn max_level() -> LevelFilter {
    LevelFilter::Info
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        // Logging from an interrupt that landed while the port was held would deadlock.
        if let Some(mut guard) = self.serial.try_lock() {
            if let Some(serial) = guard.as_mut() {
                let _ = write_log_entry_to(serial, record);
            }
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
