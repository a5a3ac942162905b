//! Error types for the storage layer

use lattice_core::LatticeError;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Blob-store failure, classified for retry policy
#[derive(Debug, Clone, Error)]
pub enum BlobStoreError {
    /// The operation may succeed if retried (network, throttling)
    #[error("transient blob-store error: {0}")]
    Transient(String),

    /// The operation will not succeed on retry
    #[error("blob-store error: {0}")]
    Fatal(String),
}

impl BlobStoreError {
    /// Whether a retry with backoff is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobStoreError::Transient(_))
    }
}

/// Chunk decode failure
///
/// Decode failures are never retriable. During enumeration a bad chunk is
/// skipped; during a compaction merge it aborts the run.
#[derive(Debug, Clone, Error)]
pub enum ChunkDecodeError {
    /// The blob does not start with the GraphCol magic
    #[error("bad chunk magic")]
    BadMagic,

    /// The format version is newer than this reader
    #[error("unsupported chunk format version {0}")]
    VersionUnsupported(u8),

    /// The blob ends before the declared content
    #[error("truncated chunk: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Bytes the decoder needed
        needed: usize,
        /// Offset at which the read failed
        offset: usize,
    },

    /// A column payload is internally inconsistent or fails its checksum
    #[error("corrupt chunk column: {0}")]
    ColumnCorrupt(String),
}

/// Error type for the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Blob-store operation failed
    #[error(transparent)]
    Blob(#[from] BlobStoreError),

    /// Chunk could not be decoded
    #[error(transparent)]
    ChunkDecode(#[from] ChunkDecodeError),

    /// Core model error (validation, value conversion)
    #[error(transparent)]
    Core(#[from] LatticeError),

    /// A flush exhausted its retry budget; the buffer was preserved
    #[error("flush failed after {attempts} attempts ({event_count} events buffered): {message}")]
    FlushFailed {
        /// Attempts made, including the first
        attempts: u32,
        /// Events still buffered
        event_count: usize,
        /// Terminal error message
        message: String,
    },

    /// Operation on a writer that has been closed
    #[error("writer is closed")]
    WriterClosed,

    /// A serialized artifact (manifest, lock, resume token) was malformed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying the whole operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Blob(e) if e.is_transient())
    }

    /// Whether this is a chunk decode failure
    pub fn is_decode(&self) -> bool {
        matches!(self, StorageError::ChunkDecode(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let e: StorageError = BlobStoreError::Transient("503".into()).into();
        assert!(e.is_transient());

        let e: StorageError = BlobStoreError::Fatal("403".into()).into();
        assert!(!e.is_transient());

        let e: StorageError = ChunkDecodeError::BadMagic.into();
        assert!(!e.is_transient());
        assert!(e.is_decode());
    }

    #[test]
    fn test_flush_failed_display() {
        let e = StorageError::FlushFailed {
            attempts: 3,
            event_count: 17,
            message: "put timed out".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("17 events"));
        assert!(msg.contains("put timed out"));
    }

    #[test]
    fn test_truncated_display() {
        let e = ChunkDecodeError::Truncated {
            needed: 8,
            offset: 42,
        };
        assert!(e.to_string().contains("offset 42"));
    }
}
