//! Error types for flightline.
//!
//! This module defines all error types used throughout the flightline crate.
//! Input errors (oversized batches, malformed samples) are rejected
//! synchronously before the engine runs; state-store errors are fatal to the
//! batch that hit them; metrics failures are isolated per session and only
//! logged.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// The main error type for flightline operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Ingestion Input Errors ===
    /// An ingestion batch exceeded the size cap.
    #[error("batch of {len} samples exceeds the maximum of {max}")]
    BatchTooLarge {
        /// Number of samples in the rejected batch.
        len: usize,
        /// Configured maximum batch size.
        max: usize,
    },

    /// A sample carried a malformed or out-of-range value.
    #[error("invalid sample: {message}")]
    InvalidSample {
        /// Description of the offending field.
        message: String,
    },

    // === Engine Errors ===
    /// The session state for a device could not be read or written.
    ///
    /// Segmentation must not proceed with default state in this case, since
    /// that risks spurious session creation.
    #[error("session state unavailable for device {device_id}: {message}")]
    StateUnavailable {
        /// The device whose state was needed.
        device_id: Uuid,
        /// Description of the store failure.
        message: String,
    },

    /// A session id did not resolve to a stored session.
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    /// The ingestion pipeline has shut down and accepts no more batches.
    #[error("ingestion pipeline is closed")]
    PipelineClosed,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightline operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new invalid-sample error.
    #[must_use]
    pub fn invalid_sample(message: impl Into<String>) -> Self {
        Self::InvalidSample {
            message: message.into(),
        }
    }

    /// Create a new state-unavailable error for a device.
    #[must_use]
    pub fn state_unavailable(device_id: Uuid, message: impl Into<String>) -> Self {
        Self::StateUnavailable {
            device_id,
            message: message.into(),
        }
    }

    /// Check if this error is a request-level input error.
    ///
    /// Input errors are the caller's to fix; retrying the same batch cannot
    /// succeed.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::BatchTooLarge { .. } | Self::InvalidSample { .. }
        )
    }

    /// Check if this error indicates a missing session.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}
