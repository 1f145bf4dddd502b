//! File logger behind the `log` facade.
//!
//! The five verbosity levels of the configuration map onto the facade's
//! levels (see `config::LogLevel::to_filter`). Records go to the
//! configured log file, opened lazily on the first record so a run that
//! never logs never creates the file; errors are mirrored to stderr.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::LogLevel;
use crate::error::CpmResult;

/// Default log file, next to wherever the emulator was started.
pub const DEFAULT_LOG_FILE: &str = "cpm80.log";

struct FileLogger {
    path: PathBuf,
    file: Mutex<Option<File>>,
    level: log::LevelFilter,
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if record.level() == log::Level::Error {
            eprintln!("cpm80: {}", record.args());
        }
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(&self.path) {
                Ok(f) => *guard = Some(f),
                Err(e) => {
                    eprintln!("cpm80: cannot open log file {}: {e}", self.path.display());
                    return;
                }
            }
        }
        if let Some(f) = guard.as_mut() {
            let ts = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let _ = writeln!(f, "{ts} {:5} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(f) = guard.as_mut() {
                let _ = f.flush();
            }
        }
    }
}

/// Install the file logger. Must be called at most once per process.
pub fn init(path: Option<PathBuf>, level: LogLevel) -> CpmResult<()> {
    let filter = level.to_filter();
    let logger = FileLogger {
        path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        file: Mutex::new(None),
        level: filter,
    };
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(filter);
    Ok(())
}
