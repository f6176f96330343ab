//! Error types for ipproxydb

use std::io;

use thiserror::Error;

/// Result type alias for ipproxydb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for database loading and lookups
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading the database file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed database row (1-based line number)
    #[error("Parse error on line {line}: {message}")]
    Parse {
        /// Line the error was found on
        line: usize,
        /// What was wrong with it
        message: String,
    },

    /// Two ranges cover the same addresses
    #[error("Overlapping ranges starting at {first} and {second}")]
    Overlap {
        /// Start of the earlier range
        first: u128,
        /// Start of the range that overlaps it
        second: u128,
    },

    /// The database file holds no ranges
    #[error("Database contains no ranges")]
    Empty,

    /// Lookup key is not an IP address
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
}

impl Error {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }
}
