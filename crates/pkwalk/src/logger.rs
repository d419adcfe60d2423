//! Logger that writes to standard error.

use std::io::Write;

use log::LevelFilter;

pub struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl StderrLogger {
    /// Installs the logger; each level of `verbosity` shows one more log level.
    pub fn install(verbosity: u8) -> Result<(), log::SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level(verbosity));
        Ok(())
    }
}

fn max_level(verbosity: u8) -> LevelFilter {
    #[cfg(debug_assertions)]
    let base = 1;
    #[cfg(not(debug_assertions))]
    let base = 0;

    match base + verbosity as usize {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        // Nowhere left to report a failed write to stderr.
        let _ = write_log_entry_to(&mut std::io::stderr().lock(), record);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> std::io::Result<()> {
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
