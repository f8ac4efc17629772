//! Console logger for the demo binary.

use std::io::Write;

use chrono::Local;
use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend printing `time level target: message` lines to stdout.
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self { level }
    }

    /// Installs the logger as the global `log` backend.
    pub fn install(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(Self::new(level)))?;
        log::set_max_level(level);
        Ok(())
    }

    fn format(&self, record: &Record<'_>) -> String {
        let timestamp = Local::now().format("%H:%M:%S%.3f").to_string();
        format!(
            "{} {} {}: {}",
            timestamp.dimmed(),
            colored_level(record.level()),
            record.target(),
            record.args()
        )
    }
}

fn colored_level(level: Level) -> ColoredString {
    let padded = format!("{:5}", level.as_str());
    let name = padded.as_str();
    match level {
        Level::Error => name.bright_red().bold(),
        Level::Warn => name.bright_yellow(),
        Level::Info => name.bright_green(),
        Level::Debug => name.bright_blue(),
        Level::Trace => name.dimmed(),
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            println!("{}", self.format(record));
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_applies() {
        let logger = ConsoleLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn line_carries_target_and_message() {
        colored::control::set_override(false);
        let logger = ConsoleLogger::new(LevelFilter::Trace);
        let line = logger.format(
            &Record::builder()
                .level(Level::Warn)
                .target("blinky")
                .args(format_args!("thread 1 start"))
                .build(),
        );
        assert!(line.ends_with("WARN  blinky: thread 1 start"), "{line}");
    }
}
