// src/error.rs
use std::io;

/// Central error type for the reactor core.
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// Error during HTTP request/response parsing.
    Parse(String),
    /// A background worker thread panicked or failed to spawn.
    WorkerPanic(String),
    /// Generic configuration or setup error.
    Other(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::WorkerPanic(msg) => write!(f, "worker panic: {}", msg),
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
