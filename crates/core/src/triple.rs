//! Triple and change-data-capture event model
//!
//! A triple is `(subject, predicate, object, timestamp, tx_id)`:
//! - `subject` is a validated entity URL (see [`crate::ident`])
//! - `predicate` is a simple field name
//! - `object` is a tagged [`TypedValue`](crate::value::TypedValue)
//! - `timestamp` is milliseconds since the Unix epoch, monotone per writer
//! - `tx_id` is a 26-character Crockford base32 identifier whose prefix
//!   sorts by creation time
//!
//! CDC events wrap a triple with the operation that produced it.

use crate::error::{LatticeError, Result};
use crate::value::TypedValue;
use serde::{Deserialize, Serialize};

/// Get current timestamp in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Crockford base32 alphabet (no I, L, O, U)
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of a transaction id in characters
pub const TX_ID_LEN: usize = 26;

/// A sortable transaction identifier
///
/// 26 Crockford base32 characters: the first 10 encode a 48-bit millisecond
/// timestamp (most significant character first), the remaining 16 encode
/// 80 bits of randomness. Lexical order on the string therefore matches
/// creation-time order down to the millisecond.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Generate a new id for the given timestamp
    pub fn generate(timestamp_ms: u64) -> Self {
        use rand::RngCore;
        let mut random = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut random);
        Self::from_parts(timestamp_ms, &random)
    }

    /// Build an id from a timestamp and 10 bytes of entropy
    pub fn from_parts(timestamp_ms: u64, random: &[u8; 10]) -> Self {
        let mut out = [0u8; TX_ID_LEN];

        // 48-bit time, 5 bits per character, most significant first.
        // 10 chars * 5 bits = 50 bits; the top two bits are always zero.
        let time = timestamp_ms & 0xFFFF_FFFF_FFFF;
        for (i, slot) in out.iter_mut().take(10).enumerate() {
            let shift = 5 * (9 - i);
            *slot = CROCKFORD[((time >> shift) & 0x1F) as usize];
        }

        // 80-bit randomness, 16 chars.
        let mut acc: u128 = 0;
        for b in random {
            acc = (acc << 8) | *b as u128;
        }
        for (i, slot) in out.iter_mut().skip(10).enumerate() {
            let shift = 5 * (15 - i);
            *slot = CROCKFORD[((acc >> shift) & 0x1F) as usize];
        }

        // The alphabet is ASCII, so this cannot fail.
        TxId(String::from_utf8_lossy(&out).into_owned())
    }

    /// Parse and validate an id
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != TX_ID_LEN {
            return Err(LatticeError::InvalidTxId(format!(
                "expected {} characters, got {}",
                TX_ID_LEN,
                input.len()
            )));
        }
        for c in input.bytes() {
            if decode_crockford(c).is_none() {
                return Err(LatticeError::InvalidTxId(format!(
                    "invalid character {:?}",
                    c as char
                )));
            }
        }
        Ok(TxId(input.to_ascii_uppercase()))
    }

    /// The millisecond timestamp embedded in the id prefix
    pub fn timestamp_ms(&self) -> u64 {
        let mut ts: u64 = 0;
        for c in self.0.bytes().take(10) {
            // Validated at construction.
            ts = (ts << 5) | decode_crockford(c).unwrap_or(0) as u64;
        }
        ts
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn decode_crockford(c: u8) -> Option<u8> {
    match c.to_ascii_uppercase() {
        b'0'..=b'9' => Some(c - b'0'),
        c @ b'A'..=b'H' => Some(c - b'A' + 10),
        b'J' => Some(18),
        b'K' => Some(19),
        b'M' => Some(20),
        b'N' => Some(21),
        b'P' => Some(22),
        b'Q' => Some(23),
        b'R' => Some(24),
        b'S' => Some(25),
        b'T' => Some(26),
        b'V' => Some(27),
        b'W' => Some(28),
        b'X' => Some(29),
        b'Y' => Some(30),
        b'Z' => Some(31),
        _ => None,
    }
}

/// A single graph triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Entity URL this fact is about
    pub subject: String,
    /// Field name within the subject
    pub predicate: String,
    /// Tagged value
    pub object: TypedValue,
    /// Milliseconds since epoch, monotone per writer
    pub timestamp_ms: u64,
    /// Transaction id that produced this fact
    pub tx_id: TxId,
}

impl Triple {
    /// Create a triple stamped with the current time and a fresh tx id
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: TypedValue,
    ) -> Self {
        let ts = now_millis();
        Triple {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
            timestamp_ms: ts,
            tx_id: TxId::generate(ts),
        }
    }
}

/// Which operation produced a CDC event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOp {
    /// A new triple was written
    Insert,
    /// An existing triple was replaced
    Update,
    /// A triple was removed
    Delete,
}

impl CdcOp {
    /// Stable single-byte encoding used by the chunk format
    pub fn as_u8(self) -> u8 {
        match self {
            CdcOp::Insert => 0,
            CdcOp::Update => 1,
            CdcOp::Delete => 2,
        }
    }

    /// Decode from the chunk format byte; unknown bytes decode as Insert
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => CdcOp::Update,
            2 => CdcOp::Delete,
            _ => CdcOp::Insert,
        }
    }
}

impl std::fmt::Display for CdcOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CdcOp::Insert => "insert",
            CdcOp::Update => "update",
            CdcOp::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// A change-data-capture event: an operation applied to a triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcEvent {
    /// What happened
    pub op: CdcOp,
    /// The triple the operation applies to
    pub triple: Triple,
}

impl CdcEvent {
    /// Convenience constructor for an insert event
    pub fn insert(triple: Triple) -> Self {
        CdcEvent {
            op: CdcOp::Insert,
            triple,
        }
    }

    /// The event timestamp (the triple's timestamp)
    pub fn timestamp_ms(&self) -> u64 {
        self.triple.timestamp_ms
    }
}

impl Triple {
    /// Encode into the wire form consumed by clients
    ///
    /// The object uses the value wire encoding; the timestamp serializes
    /// as a decimal string like other 64-bit fields.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "subject": self.subject,
            "predicate": self.predicate,
            "object": self.object.to_wire(),
            "timestamp": self.timestamp_ms.to_string(),
            "txId": self.tx_id.as_str(),
        })
    }

    /// Decode from the wire form
    pub fn from_wire(wire: &serde_json::Value) -> Result<Self> {
        let obj = wire.as_object().ok_or_else(|| {
            LatticeError::json_conversion(
                crate::error::JsonErrorKind::InvalidInput,
                "expected a triple object",
            )
        })?;
        let field = |name: &str| -> Result<&serde_json::Value> {
            obj.get(name).ok_or_else(|| {
                LatticeError::json_conversion(
                    crate::error::JsonErrorKind::MissingField,
                    format!("{} field required", name),
                )
            })
        };
        let text = |name: &str| -> Result<String> {
            field(name)?.as_str().map(str::to_string).ok_or_else(|| {
                LatticeError::json_conversion(
                    crate::error::JsonErrorKind::InvalidType,
                    format!("{} must be a string", name),
                )
            })
        };

        let timestamp_raw = field("timestamp")?;
        let timestamp_ms = match timestamp_raw {
            serde_json::Value::String(s) => s.parse::<u64>().ok(),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| {
            LatticeError::json_conversion(
                crate::error::JsonErrorKind::InvalidValue,
                "timestamp must be a decimal string or number",
            )
        })?;

        Ok(Triple {
            subject: text("subject")?,
            predicate: text("predicate")?,
            object: TypedValue::from_wire(field("object")?)?,
            timestamp_ms,
            tx_id: TxId::parse(&text("txId")?)?,
        })
    }
}
