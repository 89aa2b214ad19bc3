//! Error taxonomy for the indexing pipeline.
//!
//! File-scoped failures (extraction, storage, per-file service errors) are
//! caught at the indexer boundary and reported as per-file outcomes; they
//! never abort sibling files. `ServiceUnavailable` from the preflight check
//! aborts a whole directory sweep before any file is touched.

use thiserror::Error;

/// Main error type for docdex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad strategy name, malformed config file, or an out-of-range setting.
    /// Fatal; caught before any work begins.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Missing file or document. Non-fatal at batch level.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input the pipeline refuses to process (e.g. embedding empty text).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding service could not be reached at the transport level.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The embedding service answered with a non-success response.
    #[error("embedding service error (status {status}): {body}")]
    ServiceError { status: u16, body: String },

    /// Unreadable or corrupt document. File-scoped; the file is reported
    /// and skipped.
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    /// Persistence error from the repository. File-scoped.
    #[error("storage error: {0}")]
    StorageFailure(#[from] sqlx::Error),

    /// I/O error outside extraction and storage.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for docdex operations.
pub type Result<T> = std::result::Result<T, Error>;
