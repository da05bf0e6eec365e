//! Error types for wealthdex.
//!
//! Errors are strongly typed using thiserror and grouped by category so
//! callers can decide per category whether to abort a batch or continue.
//!
//! An absent uri, alias or date is not an error: lookups return `None`,
//! `false` or an empty collection for that case.

use std::path::PathBuf;

use thiserror::Error;

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Uri with no letters or digits.
    #[error("Uri '{value}' normalizes to an empty key")]
    InvalidUri {
        /// Input as given.
        value: String,
    },

    /// Input that names no real calendar day.
    #[error("Date '{value}' is not a recognizable calendar date")]
    InvalidDate {
        /// Input as given.
        value: String,
    },

    /// A required field is absent.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// Configuration value out of bounds or unparsable.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        /// Dotted key, e.g. `queue.max_size`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Fetched data the parser could not turn into a record.
    #[error("Record for '{uri}' is malformed: {reason}")]
    MalformedRecord {
        /// Uri the data was fetched for.
        uri: String,
        /// Parser message.
        reason: String,
    },

    /// The record type cannot be encoded in the requested format.
    #[error("Snapshot format '{format}' is not supported for kind '{kind}'")]
    UnsupportedFormat {
        /// Entity kind.
        kind: String,
        /// Format extension.
        format: String,
    },
}

/// An operation collided with state owned by someone else.
///
/// Conflicts are reported to the caller as a failed operation; nothing is
/// written when one is raised.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Rename target is already another entity's uri or alias.
    #[error("Cannot move '{from}' to '{to}': '{to}' already belongs to '{owner}'")]
    UriTaken {
        /// Current canonical uri.
        from: String,
        /// Requested uri.
        to: String,
        /// Entity answering to `to`.
        owner: String,
    },

    /// Alias already used by another entity.
    #[error("Alias '{alias}' of '{uri}' already belongs to '{owner}'")]
    AliasTaken {
        /// Entity the alias was meant for.
        uri: String,
        /// The alias.
        alias: String,
        /// Entity answering to the alias.
        owner: String,
    },

    /// An entity with this uri exists.
    #[error("Entity '{uri}' already exists")]
    AlreadyExists {
        /// Canonical uri.
        uri: String,
    },

    /// A snapshot for this date exists and overwriting was not forced.
    #[error("Snapshot {date} for '{uri}' already exists")]
    DuplicateSnapshot {
        /// Canonical uri.
        uri: String,
        /// Normalized date.
        date: String,
    },

    /// The lane holds `max_size` items.
    #[error("Queue lane '{lane}' is full (max {max_size})")]
    QueueFull {
        /// Lane name.
        lane: String,
        /// Configured bound.
        max_size: usize,
    },
}

/// Filesystem and encoding failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem call failed.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File content could not be encoded or decoded.
    #[error("Serialization failure on {}: {message}", path.display())]
    Serialization {
        /// File involved.
        path: PathBuf,
        /// Encoder or decoder message.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("Store root {} is locked by another process", path.display())]
    Locked {
        /// Lock file path.
        path: PathBuf,
    },
}

impl StorageError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps an encoding error with the path it happened on.
    pub fn serialization(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Serialization {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Top-level error type for wealthdex.
#[derive(Debug, Error)]
pub enum WealthError {
    /// See [`ValidationError`].
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// See [`ConflictError`].
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// See [`StorageError`].
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The fetcher gave up on a uri.
    #[error("Fetch of '{uri}' failed after {retries} retries: {message}")]
    Fetch {
        /// Requested uri.
        uri: String,
        /// Attempts beyond the first.
        retries: u32,
        /// Fetcher message.
        message: String,
    },

    /// Broken internal assumption.
    #[error("Internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl WealthError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for validation errors.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true for conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true for storage errors.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if repeating the operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { .. } => true,
            Self::Storage(e) => matches!(e, StorageError::Io { .. } | StorageError::Locked { .. }),
            Self::Conflict(e) => matches!(e, ConflictError::QueueFull { .. }),
            Self::Validation(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for wealthdex operations.
pub type WealthResult<T> = Result<T, WealthError>;
