//! Error types for the gpudb library

use std::fmt;
use std::io;
use thiserror::Error;

/// What a failed lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    /// No database is registered for the process
    Process(u32),
    /// The process has no record with this (kind, owner key) pair
    Record {
        /// Process that was searched
        process_id: u32,
        /// Owner key that was searched
        owner_key: u64,
    },
    /// No database has been looked up or destroyed yet
    MostRecent,
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Process(pid) => write!(f, "no database for process {}", pid),
            NotFound::Record { process_id, owner_key } => {
                write!(f, "no record 0x{:x} in process {}", owner_key, process_id)
            }
            NotFound::MostRecent => write!(f, "no most recent database"),
        }
    }
}

/// Main error type for gpudb operations
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A database for this process is already registered
    #[error("Database already exists for process {process_id}")]
    AlreadyExists {
        /// Process that was registered twice
        process_id: u32,
    },

    /// Lookup miss; a normal, recoverable outcome
    #[error("Not found: {0}")]
    NotFound(NotFound),

    /// An internal invariant was violated
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// Invalid parameter or configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A lock holder panicked; the guarded state can no longer be trusted
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// Trace or export file error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// Check whether this error is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackerError::NotFound(_))
    }

    /// Check whether this error reports a broken invariant
    pub fn is_corrupted(&self) -> bool {
        matches!(self, TrackerError::Corrupted(_))
    }
}

/// Result type for gpudb operations
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Build a `Corrupted` error.
///
/// Structural integrity cannot be repaired from this layer. With the
/// `strict-integrity` feature the defect aborts the caller immediately;
/// otherwise it is logged and handed back so the caller can continue on a
/// best-effort basis.
pub(crate) fn corrupted(message: impl Into<String>) -> TrackerError {
    let message = message.into();
    log::error!("integrity violation: {}", message);

    if cfg!(feature = "strict-integrity") {
        panic!("integrity violation: {}", message);
    }

    TrackerError::Corrupted(message)
}

/// Map a poisoned lock to `LockPoisoned`
pub(crate) fn poisoned<T>(domain: &'static str) -> impl FnOnce(std::sync::PoisonError<T>) -> TrackerError {
    move |_| {
        log::error!("{} lock poisoned", domain);
        TrackerError::LockPoisoned(domain)
    }
}
