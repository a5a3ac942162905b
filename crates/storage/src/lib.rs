//! Storage engine for the Lattice triple store
//!
//! This crate owns the write/compact/restore pipeline over an immutable
//! blob store:
//! - the [`blob`] capability the engine consumes (with an in-memory fake)
//! - the [`chunk`] (GraphCol) columnar format and its header-only stats
//! - the [`paths`] scheme that keys chunks chronologically per namespace
//! - the per-namespace [`manifest`] of live chunks
//! - the CDC [`writer`] that batches events into L0 chunks, and the
//!   [`registry`] that routes events to one writer per namespace
//! - the tiered [`compaction`] pipeline (L0 -> L1 -> L2)
//! - the point-in-time [`restore`] engine with resumable cursors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod chunk;
pub mod compaction;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod restore;
pub mod writer;

pub use blob::{BlobResult, BlobStore, MemoryBlobStore, ObjectMeta};
pub use chunk::{
    decode_chunk, encode_chunk, ChunkStats, CHUNK_FORMAT_VERSION, CHUNK_HEADER_SIZE, CHUNK_MAGIC,
};
pub use compaction::{
    select_chunks_for_compaction, ChunkInfo, CompactionEvent, CompactionLock, CompactionTier,
    Compactor, CompactorConfig,
};
pub use error::{BlobStoreError, ChunkDecodeError, Result, StorageError};
pub use manifest::{ManifestStore, NamespaceManifest};
pub use paths::{
    chunk_date, chunk_path, format_date_path, is_chunk_key, level_prefix, lock_path,
    manifest_path, parse_chunk_timestamp, Level, CHUNK_EXT, LOCK_FILE, MANIFEST_FILE,
};
pub use registry::WriterRegistry;
pub use restore::{
    BackupMetadata, BackupSnapshot, ListBackupsOptions, RestoreEngine, RestoreOptions,
    RestoreProgress, RestoreResult,
};
pub use writer::{CdcWriter, CdcWriterConfig, WriterErrorEvent, WriterStats};
