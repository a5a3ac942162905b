//! Core types for the Lattice triple store
//!
//! This crate defines the foundational model shared by the storage and edge
//! layers:
//! - Entity URLs, namespaces, and the reversed-domain storage path mapping
//! - The triple / CDC event model and sortable transaction ids
//! - The typed value algebra with its row and wire encodings
//! - Bloom filters for negative lookups
//! - Consistent shard assignment
//! - The core error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bloom;
pub mod error;
pub mod ident;
pub mod shard;
pub mod triple;
pub mod value;

pub use bloom::{BloomBuilder, BloomFilter, SerializedBloom, DEFAULT_FP_RATE};
pub use error::{EntityIdErrorKind, JsonErrorKind, LatticeError, Result};
pub use ident::{
    url_from_storage_path, validate_predicate, EntityUrl, Namespace, MAX_ENTITY_URL_LEN,
};
pub use shard::{fnv1a_32, ShardAssignment, ShardRouter, DEFAULT_SHARD_COUNT};
pub use triple::{now_millis, CdcEvent, CdcOp, Triple, TxId, TX_ID_LEN};
pub use value::{GeoPoint, ObjectType, TypedValue, ValueRow};
