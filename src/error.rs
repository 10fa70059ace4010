//! Error types for the Good Health Check engine
//!
//! Absent statistics are not errors: lookups return `Option` and the
//! affected rule is skipped. Errors here are either data-source failures
//! or malformed input.

use thiserror::Error;

use crate::statistic::RunType;

/// Result type alias for GHC operations
pub type Result<T> = std::result::Result<T, GhcError>;

/// Main error type for GHC operations
#[derive(Error, Debug)]
pub enum GhcError {
    /// Measurement or flag store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid channel reference
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A sub-pass found no data at all for its run type
    #[error("No {0} data found")]
    NoData(RunType),

    /// Statistic key text not in the key vocabulary
    #[error("Unknown statistic key: {0}")]
    UnknownKey(String),

    /// Flag code not in the flag vocabulary
    #[error("Unknown flag: {0}")]
    UnknownFlag(String),

    /// Malformed statistics file line
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// File access failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or threshold policy
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GhcError {
    /// Whether this error must abort a whole classification attempt
    ///
    /// Only loss of the data store is fatal; everything else is contained
    /// within the sub-pass that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_fatal())
    }
}

/// Errors raised by measurement and flag stores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A read failed
    #[error("Read failed: {0}")]
    Read(String),

    /// A batch write failed and was rolled back
    #[error("Write failed: {0}")]
    Write(String),
}

impl StoreError {
    /// Connectivity failures abort classification; read/write failures do not
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors related to channel identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// ID does not belong to either subdetector
    #[error("Invalid channel ID: {0}")]
    InvalidId(u32),

    /// ID text is not a number
    #[error("Malformed channel ID: {0:?}")]
    Malformed(String),

    /// Subdetector code not recognised
    #[error("Unknown subdetector: {0}")]
    UnknownSubdetector(String),
}
