//! Error types for the CP/M emulator.

use std::path::PathBuf;

use thiserror::Error;

/// Host-level failures surfaced to the embedding binary.
///
/// Guest-visible error codes (0xFF, 0x01, 0x02, 0x05, 0x06) are plain data
/// returned in register A; they never appear here.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("invalid command name: {0}")]
    BadCommandName(String),

    #[error("command file {} too large for the TPA", .0.display())]
    ProgramTooLarge(PathBuf),

    #[error("drive {0}: not defined")]
    DriveNotConfigured(char),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Config {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("logger already installed")]
    Logger(#[from] log::SetLoggerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CpmError {
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

/// Result type for emulator operations.
pub type CpmResult<T> = Result<T, CpmError>;
