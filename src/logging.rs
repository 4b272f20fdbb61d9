//! Stderr backend for the `log` facade.
//!
//! The threshold comes from `LOG_LEVEL`, a numeric syslog priority
//! (3 = error, 4 = warning, 6 = info, 7 = debug). Unset or unparsable
//! values fall back to info.

use std::io::Write;

use log::{Level, LevelFilter, Metadata, Record};

use crate::config::ENV_LOG_LEVEL;

const DEFAULT_SYSLOG_LEVEL: u32 = 6;

static LOGGER: StderrLogger = StderrLogger;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(std::io::stderr().lock(), "{}: {}", label(record.level()), record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn label(level: Level) -> &'static str {
    match level {
        Level::Error => "Error",
        Level::Warn => "Warning",
        Level::Info => "Info",
        Level::Debug | Level::Trace => "Debug",
    }
}

/// Maps a syslog priority onto a `log` filter.
pub fn level_filter(syslog_level: u32) -> LevelFilter {
    match syslog_level {
        0..=2 => LevelFilter::Off,
        3 => LevelFilter::Error,
        4 | 5 => LevelFilter::Warn,
        6 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Installs the stderr logger and applies `LOG_LEVEL`.
///
/// Safe to call repeatedly. If the host process already installed its own
/// logger that one is kept and only the threshold is updated.
pub fn init() {
    let level = std::env::var(ENV_LOG_LEVEL)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_SYSLOG_LEVEL);

    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level_filter(level));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(0), LevelFilter::Off);
        assert_eq!(level_filter(3), LevelFilter::Error);
        assert_eq!(level_filter(4), LevelFilter::Warn);
        assert_eq!(level_filter(5), LevelFilter::Warn);
        assert_eq!(level_filter(6), LevelFilter::Info);
        assert_eq!(level_filter(7), LevelFilter::Debug);
        assert_eq!(level_filter(42), LevelFilter::Debug);
    }

    #[test]
    fn test_labels() {
        assert_eq!(label(Level::Error), "Error");
        assert_eq!(label(Level::Trace), "Debug");
    }
}
