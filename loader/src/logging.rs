//! The boot logger: `log` facade fanned out to every console sink.
//!
//! User-visible failures print a single line prefixed `ERROR:`, warnings
//! get `WARNING:`; everything below is plain text. The `verbose` config
//! directive maps onto the facade's level filter.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::console::ConsoleWriter;

struct BootLogger;

static LOGGER: BootLogger = BootLogger;

impl Log for BootLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut out = ConsoleWriter;
        let prefix = match record.level() {
            Level::Error => "ERROR: ",
            Level::Warn => "WARNING: ",
            _ => "",
        };
        let _ = write!(out, "{prefix}");
        let _ = writeln!(out, "{}", record.args());
    }

    fn flush(&self) {}
}

/// Installs the logger; called once at entry.
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Warn);
}

/// Applies the `verbose 0..3` config directive.
pub fn set_verbosity(verbose: u8) {
    log::set_max_level(match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
}
