use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::serial_println;

// ANSI foreground colors
#[derive(Debug, Clone, Copy)]
enum Color {
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
}
impl From<Level> for Color {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Blue,
            Level::Trace => Color::Magenta,
        }
    }
}
const RESET: &str = "\x1b[0;0m";

struct Logger;
impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial_println!(
            "[\x1b[1;3{}m{}{}] {}",
            Color::from(record.level()) as u8,
            record.level(),
            RESET,
            record.args()
        );
    }
    fn flush(&self) {}
}
#[cfg(debug_assertions)]
const MAX_LEVEL: Level = Level::Trace;
#[cfg(not(debug_assertions))]
const MAX_LEVEL: Level = Level::Info;

/// Sends the driver's logs to COM1. Fails if another logger was installed first.
pub fn initialize_logger() -> Result<(), SetLoggerError> {
    static LOGGER: Logger = Logger;
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_filter());
    Ok(())
}

fn level_filter() -> LevelFilter {
    MAX_LEVEL.to_level_filter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_lets_through_what_the_logger_accepts() {
        let accepted = Metadata::builder().level(MAX_LEVEL).build();
        assert!(Logger.enabled(&accepted));
        assert!(MAX_LEVEL <= level_filter());
        #[cfg(debug_assertions)]
        assert_eq!(level_filter(), LevelFilter::Trace);
    }
}
