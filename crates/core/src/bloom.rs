//! Bloom filters for negative entity lookups
//!
//! A classic m-bit array with k hash functions derived by double hashing:
//! `h_i = (h1 + i * h2) mod m`. Filters answer "definitely absent" or
//! "possibly present"; the read path uses them to short-circuit storage
//! lookups for entities that were never written.
//!
//! Filters are **content-addressed**: the cache key downstream is
//! `(namespace, version)` and the bits under a given version never change.
//! Publishing new bits means publishing a new version.
//!
//! An empty or unconfigured filter passes everything through (`might_exist`
//! returns `true`) so a missing filter can never turn into a false 404.

use crate::error::{LatticeError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Default false-positive rate when none is configured
pub const DEFAULT_FP_RATE: f64 = 0.01;

/// A bloom filter with double-hashed probes
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    /// Number of bits (not bytes)
    m: u32,
    /// Number of hash probes per item
    k: u32,
    /// Content-address version of these bits
    version: String,
    /// Number of set bits is not tracked; this flags "anything inserted"
    any_set: bool,
}

/// Serialized form of a bloom filter: base64 bits plus parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedBloom {
    /// Base64-encoded bit array
    pub bits: String,
    /// Number of hash probes
    pub k: u32,
    /// Number of bits
    pub m: u32,
    /// Content-address version
    pub version: String,
}

impl BloomFilter {
    /// Create a filter sized for `capacity` items at `fp_rate`
    ///
    /// `m = ceil(-n ln p / (ln 2)^2)`, `k = round(m/n * ln 2)`, both
    /// clamped to at least 1.
    pub fn with_capacity(capacity: usize, fp_rate: f64, version: impl Into<String>) -> Self {
        let n = capacity.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(1.0) as u32;
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u32;
        BloomFilter {
            bits: vec![0u8; ((m + 7) / 8) as usize],
            m,
            k,
            version: version.into(),
            any_set: false,
        }
    }

    /// Number of bits
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Number of hash probes
    pub fn k(&self) -> u32 {
        self.k
    }

    /// The content-address version of these bits
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether anything has been inserted (or any bit is set)
    pub fn is_empty(&self) -> bool {
        !self.any_set
    }

    /// Insert an item
    pub fn add(&mut self, item: &str) {
        if self.m == 0 {
            return;
        }
        let (h1, h2) = probes(item);
        for i in 0..self.k {
            let bit = probe_index(h1, h2, i, self.m);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        self.any_set = true;
    }

    /// Insert many items
    pub fn add_many<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            self.add(item.as_ref());
        }
    }

    /// Probabilistic membership test
    ///
    /// `false` means definitely absent. An empty or unconfigured filter
    /// returns `true` (pass-through).
    pub fn might_exist(&self, item: &str) -> bool {
        if self.m == 0 || !self.any_set {
            return true;
        }
        let (h1, h2) = probes(item);
        (0..self.k).all(|i| {
            let bit = probe_index(h1, h2, i, self.m);
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    /// Serialize to the `{bits, k, m, version}` JSON document
    pub fn serialize(&self) -> String {
        let doc = SerializedBloom {
            bits: BASE64.encode(&self.bits),
            k: self.k,
            m: self.m,
            version: self.version.clone(),
        };
        // The document contains no non-serializable values.
        serde_json::to_string(&doc).unwrap_or_default()
    }

    /// Deserialize from the `{bits, k, m, version}` JSON document
    pub fn deserialize(input: &str) -> Result<Self> {
        let doc: SerializedBloom = serde_json::from_str(input)
            .map_err(|e| LatticeError::Serialization(format!("bloom document: {}", e)))?;
        Self::from_serialized(&doc)
    }

    /// Rebuild from an already-parsed serialized document
    pub fn from_serialized(doc: &SerializedBloom) -> Result<Self> {
        let bits = BASE64
            .decode(&doc.bits)
            .map_err(|e| LatticeError::Serialization(format!("bloom bits: {}", e)))?;
        if bits.len() != ((doc.m + 7) / 8) as usize {
            return Err(LatticeError::Serialization(format!(
                "bloom bits length {} does not match m={}",
                bits.len(),
                doc.m
            )));
        }
        let any_set = bits.iter().any(|b| *b != 0);
        Ok(BloomFilter {
            bits,
            m: doc.m,
            k: doc.k,
            version: doc.version.clone(),
            any_set,
        })
    }

    /// Merge another filter into this one (bitwise OR)
    ///
    /// Both filters must share identical `m` and `k`.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<()> {
        if self.m != other.m || self.k != other.k {
            return Err(LatticeError::BloomMismatch(format!(
                "cannot merge m={}/k={} into m={}/k={}",
                other.m, other.k, self.m, self.k
            )));
        }
        for (dst, src) in self.bits.iter_mut().zip(other.bits.iter()) {
            *dst |= *src;
        }
        self.any_set = self.any_set || other.any_set;
        Ok(())
    }
}

/// Append-only bloom filter builder with a running version
///
/// Each append produces a new version string `{base}.{generation}`, so a
/// content-addressed cache sees every published state under a distinct key.
#[derive(Debug, Clone)]
pub struct BloomBuilder {
    filter: BloomFilter,
    base_version: String,
    generation: u64,
}

impl BloomBuilder {
    /// Create a builder for `capacity` items at `fp_rate`
    pub fn new(capacity: usize, fp_rate: f64, base_version: impl Into<String>) -> Self {
        let base_version = base_version.into();
        let filter = BloomFilter::with_capacity(
            capacity,
            fp_rate,
            format!("{}.0", base_version),
        );
        BloomBuilder {
            filter,
            base_version,
            generation: 0,
        }
    }

    /// Append items, advancing the version
    pub fn append<I, S>(&mut self, items: I) -> &BloomFilter
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter.add_many(items);
        self.generation += 1;
        self.filter.version = format!("{}.{}", self.base_version, self.generation);
        &self.filter
    }

    /// The current filter state
    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// The current version string
    pub fn version(&self) -> &str {
        self.filter.version()
    }
}

/// Derive the two base hashes for double hashing
///
/// Both halves of a 64-bit FNV-1a; the stride is forced odd so it never
/// collapses to zero modulo a power of two.
fn probes(item: &str) -> (u32, u32) {
    let h = fnv1a_64(item.as_bytes());
    let h1 = (h & 0xFFFF_FFFF) as u32;
    let h2 = ((h >> 32) as u32) | 1;
    (h1, h2)
}

fn probe_index(h1: u32, h2: u32, i: u32, m: u32) -> u32 {
    ((h1 as u64 + i as u64 * h2 as u64) % m as u64) as u32
}

fn fnv1a_64(input: &[u8]) -> u64 {
    let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
    for byte in input {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}
