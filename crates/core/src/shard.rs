//! Consistent shard assignment for namespaces
//!
//! Shard routing hashes the namespace string with 32-bit FNV-1a and reduces
//! it modulo the shard count. Assignment depends only on the namespace, so
//! an entity's shard never changes as long as its namespace exists.

use crate::ident::Namespace;
use serde::{Deserialize, Serialize};

/// Default number of shards
pub const DEFAULT_SHARD_COUNT: u32 = 256;

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash
///
/// The shard id format pins this exact function: changing it would remap
/// every namespace.
pub fn fnv1a_32(input: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A namespace's position in the shard ring
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardAssignment {
    /// Shard index in `[0, shard_count)`
    pub index: u32,
    /// Stable shard identifier: `shard-{index}-{hash:x}`
    pub id: String,
    /// The full 32-bit hash the index was derived from
    pub hash: u32,
}

/// Maps namespaces to shards
#[derive(Debug, Clone)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    /// Create a router over `shard_count` shards
    pub fn new(shard_count: u32) -> Self {
        ShardRouter {
            shard_count: shard_count.max(1),
        }
    }

    /// The number of shards this router maps onto
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Assign a namespace to its shard
    pub fn assign(&self, namespace: &Namespace) -> ShardAssignment {
        self.assign_key(namespace.as_str())
    }

    /// Assign a raw namespace key to its shard
    pub fn assign_key(&self, namespace: &str) -> ShardAssignment {
        let hash = fnv1a_32(namespace);
        let index = hash % self.shard_count;
        ShardAssignment {
            index,
            id: format!("shard-{}-{:x}", index, hash),
            hash,
        }
    }
}

impl Default for ShardRouter {
    fn default() -> Self {
        ShardRouter::new(DEFAULT_SHARD_COUNT)
    }
}
