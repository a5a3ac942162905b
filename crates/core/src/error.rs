//! Error types for the Lattice core model
//!
//! This module defines the errors raised while validating identifiers and
//! converting typed values. We use `thiserror` for automatic `Display` and
//! `Error` trait implementations.
//!
//! Storage- and cache-level failures live in their own crates; the core only
//! knows about model-level validation.

use thiserror::Error;

/// Result type alias for core model operations
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Why an entity URL was rejected
///
/// Sub-codes surfaced inside [`LatticeError::InvalidEntityId`] so callers can
/// report the precise validation failure without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityIdErrorKind {
    /// The input was empty or whitespace-only
    Empty,
    /// The input exceeded the maximum URL length
    TooLong,
    /// The input contained control, zero-width, BOM, or replacement code points
    InvalidCharacters,
    /// The input did not parse as an absolute URL
    InvalidUrl,
    /// The URL scheme was not `http` or `https`
    InvalidProtocol,
    /// The URL had no usable hostname
    InvalidHostname,
    /// The URL carried userinfo (`user:pass@`)
    HasUserInfo,
}

impl std::fmt::Display for EntityIdErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityIdErrorKind::Empty => "empty",
            EntityIdErrorKind::TooLong => "too long",
            EntityIdErrorKind::InvalidCharacters => "invalid characters",
            EntityIdErrorKind::InvalidUrl => "invalid url",
            EntityIdErrorKind::InvalidProtocol => "invalid protocol",
            EntityIdErrorKind::InvalidHostname => "invalid hostname",
            EntityIdErrorKind::HasUserInfo => "has userinfo",
        };
        write!(f, "{}", name)
    }
}

/// Why a value conversion failed
///
/// Sub-codes surfaced inside [`LatticeError::JsonConversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonErrorKind {
    /// A required field was absent from the input
    MissingField,
    /// The declared type tag did not match the payload shape
    InvalidType,
    /// The payload was the right shape but the value was out of range
    InvalidValue,
    /// The input was not interpretable at all
    InvalidInput,
}

impl std::fmt::Display for JsonErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JsonErrorKind::MissingField => "missing field",
            JsonErrorKind::InvalidType => "invalid type",
            JsonErrorKind::InvalidValue => "invalid value",
            JsonErrorKind::InvalidInput => "invalid input",
        };
        write!(f, "{}", name)
    }
}

/// Error type for the Lattice core model
#[derive(Debug, Error)]
pub enum LatticeError {
    /// An entity URL failed validation
    #[error("invalid entity id ({kind}): {input}")]
    InvalidEntityId {
        /// Which validation rule rejected the input
        kind: EntityIdErrorKind,
        /// The offending input, truncated for display
        input: String,
    },

    /// A predicate name failed validation
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A typed value conversion failed
    #[error("value conversion failed ({kind}): {message}")]
    JsonConversion {
        /// Which class of conversion failure occurred
        kind: JsonErrorKind,
        /// Human-readable context
        message: String,
    },

    /// A transaction id failed validation
    #[error("invalid transaction id: {0}")]
    InvalidTxId(String),

    /// Bloom filter parameters were incompatible
    #[error("bloom filter mismatch: {0}")]
    BloomMismatch(String),

    /// A serialized artifact could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LatticeError {
    /// Create an `InvalidEntityId` error, truncating long inputs for display
    pub fn invalid_entity_id(kind: EntityIdErrorKind, input: &str) -> Self {
        let mut shown: String = input.chars().take(128).collect();
        if shown.len() < input.len() {
            shown.push_str("...");
        }
        LatticeError::InvalidEntityId { kind, input: shown }
    }

    /// Create a `JsonConversion` error
    pub fn json_conversion(kind: JsonErrorKind, message: impl Into<String>) -> Self {
        LatticeError::JsonConversion {
            kind,
            message: message.into(),
        }
    }

    /// Check whether this error is a validation failure
    ///
    /// Validation failures cannot be fixed by retrying; the input must change.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LatticeError::InvalidEntityId { .. }
                | LatticeError::InvalidPredicate(_)
                | LatticeError::InvalidTxId(_)
                | LatticeError::JsonConversion { .. }
        )
    }

    /// The entity-id sub-code, if this is an entity-id error
    pub fn entity_id_kind(&self) -> Option<EntityIdErrorKind> {
        match self {
            LatticeError::InvalidEntityId { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(e: serde_json::Error) -> Self {
        LatticeError::Serialization(format!("JSON error: {}", e))
    }
}
