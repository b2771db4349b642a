//! Error types for the `ragchat-retrieval` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in retrieval operations.
///
/// Re-uploading a document whose name is already present is not an error;
/// it is reported as [`AddOutcome::Duplicate`](crate::AddOutcome::Duplicate).
/// Querying an empty index is not an error either and yields an empty result.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An embedding call did not complete within the configured timeout.
    #[error("Embedding timeout ({provider}): no response within {timeout:?}")]
    EmbeddingTimeout {
        /// The embedding provider that timed out.
        provider: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// An uploaded payload could not be decoded into a document.
    #[error("Decode error ({name}): {message}")]
    DecodeError {
        /// The display name of the rejected upload.
        name: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during document chunking.
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    /// The caller supplied an invalid argument, such as `top_k == 0`.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No document with the given name is stored.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// A vector does not match the dimensionality of the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The index dimensionality.
        expected: usize,
        /// The offending vector's length.
        actual: usize,
    },

    /// The chunk store and the vector index disagree on their row count.
    #[error("Index inconsistency: {chunks} chunks but {rows} index rows")]
    IndexInconsistency {
        /// Number of chunks in the chunk store.
        chunks: usize,
        /// Number of rows in the vector index.
        rows: usize,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
