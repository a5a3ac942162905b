//! GraphCol: the self-describing columnar chunk format
//!
//! A chunk is an immutable blob holding the CDC events of one namespace,
//! laid out so consumers can compute statistics without materializing the
//! triples.
//!
//! # Format
//!
//! ```text
//! +--------------------+
//! | Magic: "GCOL"      | 4 bytes
//! | Format Version     | 1 byte
//! | Flags              | 1 byte (reserved, 0)
//! | Triple Count       | 4 bytes (u32 LE)
//! | Min Timestamp      | 8 bytes (u64 LE)
//! | Max Timestamp      | 8 bytes (u64 LE)
//! | Predicate Count    | 2 bytes (u16 LE)
//! | Predicate Directory| variable (name, offset, length, row count)
//! | Column Payloads    | variable
//! | CRC32              | 4 bytes (u32 LE, over all preceding bytes)
//! +--------------------+
//! ```
//!
//! Triples are stably sorted by timestamp before encoding and partitioned
//! into one column per predicate. Each row carries its post-sort ordinal so
//! decoding reproduces the exact encoded order, predicate ties included.
//!
//! Rows carry a one-byte CDC op-code, so a restore can replay the original
//! operation rather than flattening everything to inserts.

use crate::error::ChunkDecodeError;
use byteorder::{ByteOrder, LittleEndian};
use lattice_core::{CdcEvent, CdcOp, GeoPoint, ObjectType, Triple, TxId, TypedValue, TX_ID_LEN};
use std::collections::BTreeMap;

/// Chunk magic bytes
pub const CHUNK_MAGIC: [u8; 4] = *b"GCOL";

/// Current chunk format version
pub const CHUNK_FORMAT_VERSION: u8 = 1;

/// Fixed-size header length (everything before the predicate directory)
pub const CHUNK_HEADER_SIZE: usize = 28;

/// Statistics computed from a chunk header without a full decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStats {
    /// Number of triples in the chunk
    pub triple_count: u32,
    /// Smallest triple timestamp (0 for an empty chunk)
    pub min_timestamp: u64,
    /// Largest triple timestamp (0 for an empty chunk)
    pub max_timestamp: u64,
    /// Predicates present, in directory order
    pub predicates: Vec<String>,
}

impl ChunkStats {
    /// Read statistics from an encoded chunk
    ///
    /// Touches only the header and predicate directory; column payloads are
    /// neither read nor checksummed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkDecodeError> {
        let mut reader = Reader::new(bytes);
        let header = read_header(&mut reader)?;
        let directory = read_directory(&mut reader, header.predicate_count)?;
        Ok(ChunkStats {
            triple_count: header.triple_count,
            min_timestamp: header.min_timestamp,
            max_timestamp: header.max_timestamp,
            predicates: directory.into_iter().map(|d| d.predicate).collect(),
        })
    }

    /// The `(min, max)` timestamp range
    pub fn time_range(&self) -> (u64, u64) {
        (self.min_timestamp, self.max_timestamp)
    }
}

/// Encode CDC events into a chunk
///
/// Events are stably sorted by timestamp ascending; ties keep their input
/// order. The output is self-contained and immutable.
pub fn encode_chunk(events: &[CdcEvent]) -> Vec<u8> {
    let mut sorted: Vec<&CdcEvent> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp_ms());

    let min_ts = sorted.first().map(|e| e.timestamp_ms()).unwrap_or(0);
    let max_ts = sorted.last().map(|e| e.timestamp_ms()).unwrap_or(0);

    // Partition into per-predicate columns, remembering post-sort ordinals.
    let mut columns: BTreeMap<&str, Vec<(u32, &CdcEvent)>> = BTreeMap::new();
    for (ordinal, event) in sorted.iter().copied().enumerate() {
        columns
            .entry(event.triple.predicate.as_str())
            .or_default()
            .push((ordinal as u32, event));
    }

    // Encode payloads first so the directory can carry real offsets.
    let mut payload = Vec::new();
    let mut directory: Vec<(String, u32, u32, u32)> = Vec::with_capacity(columns.len());
    for (predicate, rows) in &columns {
        let offset = payload.len() as u32;
        for (ordinal, event) in rows {
            encode_row(&mut payload, *ordinal, event);
        }
        let length = payload.len() as u32 - offset;
        directory.push((predicate.to_string(), offset, length, rows.len() as u32));
    }

    let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len() + 64);
    out.extend_from_slice(&CHUNK_MAGIC);
    out.push(CHUNK_FORMAT_VERSION);
    out.push(0); // flags
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    out.extend_from_slice(&min_ts.to_le_bytes());
    out.extend_from_slice(&max_ts.to_le_bytes());
    out.extend_from_slice(&(directory.len() as u16).to_le_bytes());
    for (predicate, offset, length, rows) in &directory {
        out.extend_from_slice(&(predicate.len() as u16).to_le_bytes());
        out.extend_from_slice(predicate.as_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&rows.to_le_bytes());
    }
    out.extend_from_slice(&payload);

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Decode a chunk back into its CDC events
///
/// Returns events in the exact order they were encoded (timestamp-sorted).
/// Verifies the trailing CRC and the header's declared timestamp bounds.
pub fn decode_chunk(bytes: &[u8]) -> Result<Vec<CdcEvent>, ChunkDecodeError> {
    if bytes.len() < CHUNK_HEADER_SIZE + 4 {
        return Err(ChunkDecodeError::Truncated {
            needed: CHUNK_HEADER_SIZE + 4,
            offset: 0,
        });
    }

    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = LittleEndian::read_u32(crc_bytes);
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(ChunkDecodeError::ColumnCorrupt(format!(
            "crc mismatch: stored {:08x}, computed {:08x}",
            stored_crc, computed_crc
        )));
    }

    let mut reader = Reader::new(body);
    let header = read_header(&mut reader)?;
    let directory = read_directory(&mut reader, header.predicate_count)?;
    let payload_base = reader.pos;

    let mut events: Vec<(u32, CdcEvent)> = Vec::with_capacity(header.triple_count as usize);
    for entry in &directory {
        let start = payload_base + entry.offset as usize;
        let end = start + entry.length as usize;
        if end > body.len() {
            return Err(ChunkDecodeError::ColumnCorrupt(format!(
                "column {:?} extends past payload",
                entry.predicate
            )));
        }
        let mut column = Reader::with_offset(&body[..end], start);
        for _ in 0..entry.row_count {
            let (ordinal, event) = decode_row(&mut column, &entry.predicate)?;
            events.push((ordinal, event));
        }
        if column.pos != end {
            return Err(ChunkDecodeError::ColumnCorrupt(format!(
                "column {:?} has {} trailing bytes",
                entry.predicate,
                end - column.pos
            )));
        }
    }

    if events.len() != header.triple_count as usize {
        return Err(ChunkDecodeError::ColumnCorrupt(format!(
            "directory rows {} disagree with triple count {}",
            events.len(),
            header.triple_count
        )));
    }

    events.sort_by_key(|(ordinal, _)| *ordinal);

    // Declared bounds must be the witnessed extremes.
    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        let min = first.1.timestamp_ms();
        let max = events
            .iter()
            .map(|(_, e)| e.timestamp_ms())
            .max()
            .unwrap_or(last.1.timestamp_ms());
        if min != header.min_timestamp || max != header.max_timestamp {
            return Err(ChunkDecodeError::ColumnCorrupt(format!(
                "timestamp bounds [{}, {}] disagree with data [{}, {}]",
                header.min_timestamp, header.max_timestamp, min, max
            )));
        }
    }

    Ok(events.into_iter().map(|(_, e)| e).collect())
}

// =============================================================================
// Header and directory
// =============================================================================

struct Header {
    triple_count: u32,
    min_timestamp: u64,
    max_timestamp: u64,
    predicate_count: u16,
}

struct DirEntry {
    predicate: String,
    offset: u32,
    length: u32,
    row_count: u32,
}

fn read_header(reader: &mut Reader<'_>) -> Result<Header, ChunkDecodeError> {
    let magic = reader.bytes(4)?;
    if magic != CHUNK_MAGIC {
        return Err(ChunkDecodeError::BadMagic);
    }
    let version = reader.u8()?;
    if version != CHUNK_FORMAT_VERSION {
        return Err(ChunkDecodeError::VersionUnsupported(version));
    }
    let _flags = reader.u8()?;
    Ok(Header {
        triple_count: reader.u32()?,
        min_timestamp: reader.u64()?,
        max_timestamp: reader.u64()?,
        predicate_count: reader.u16()?,
    })
}

fn read_directory(
    reader: &mut Reader<'_>,
    count: u16,
) -> Result<Vec<DirEntry>, ChunkDecodeError> {
    let mut directory = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name = reader.bytes(name_len)?;
        let predicate = std::str::from_utf8(name)
            .map_err(|_| ChunkDecodeError::ColumnCorrupt("non-UTF-8 predicate".into()))?
            .to_string();
        directory.push(DirEntry {
            predicate,
            offset: reader.u32()?,
            length: reader.u32()?,
            row_count: reader.u32()?,
        });
    }
    Ok(directory)
}

// =============================================================================
// Rows
// =============================================================================

fn encode_row(out: &mut Vec<u8>, ordinal: u32, event: &CdcEvent) {
    let triple = &event.triple;
    out.extend_from_slice(&ordinal.to_le_bytes());
    out.extend_from_slice(&(triple.subject.len() as u16).to_le_bytes());
    out.extend_from_slice(triple.subject.as_bytes());
    out.extend_from_slice(triple.tx_id.as_str().as_bytes());
    out.extend_from_slice(&triple.timestamp_ms.to_le_bytes());
    out.push(event.op.as_u8());
    out.push(triple.object.object_type().as_u8());
    encode_value(out, &triple.object);
}

fn decode_row(
    reader: &mut Reader<'_>,
    predicate: &str,
) -> Result<(u32, CdcEvent), ChunkDecodeError> {
    let ordinal = reader.u32()?;
    let subject_len = reader.u16()? as usize;
    let subject = std::str::from_utf8(reader.bytes(subject_len)?)
        .map_err(|_| ChunkDecodeError::ColumnCorrupt("non-UTF-8 subject".into()))?
        .to_string();
    let tx_raw = std::str::from_utf8(reader.bytes(TX_ID_LEN)?)
        .map_err(|_| ChunkDecodeError::ColumnCorrupt("non-UTF-8 tx id".into()))?
        .to_string();
    let tx_id = TxId::parse(&tx_raw)
        .map_err(|e| ChunkDecodeError::ColumnCorrupt(format!("tx id: {}", e)))?;
    let timestamp_ms = reader.u64()?;
    let op = CdcOp::from_u8(reader.u8()?);
    let tag = ObjectType::from_u8(reader.u8()?);
    let object = decode_value(reader, tag)?;

    Ok((
        ordinal,
        CdcEvent {
            op,
            triple: Triple {
                subject,
                predicate: predicate.to_string(),
                object,
                timestamp_ms,
                tx_id,
            },
        },
    ))
}

fn encode_value(out: &mut Vec<u8>, value: &TypedValue) {
    match value {
        TypedValue::Null => {}
        TypedValue::Bool(b) => out.push(*b as u8),
        TypedValue::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        TypedValue::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        TypedValue::Float64(f) => out.extend_from_slice(&f.to_le_bytes()),
        TypedValue::Timestamp(ts) => out.extend_from_slice(&ts.to_le_bytes()),
        TypedValue::Date(d) => out.extend_from_slice(&d.to_le_bytes()),
        TypedValue::String(s) | TypedValue::Duration(s) | TypedValue::Url(s) => {
            write_blob(out, s.as_bytes())
        }
        TypedValue::Ref(r) => write_blob(out, r.as_bytes()),
        TypedValue::Binary(b) => write_blob(out, b),
        TypedValue::RefArray(refs) => write_json(out, refs),
        TypedValue::Json(doc) => write_json(out, doc),
        TypedValue::GeoPoint(p) => {
            out.extend_from_slice(&p.lat.to_le_bytes());
            out.extend_from_slice(&p.lng.to_le_bytes());
        }
        TypedValue::GeoPolygon(pts) | TypedValue::GeoLineString(pts) => write_json(out, pts),
    }
}

fn decode_value(
    reader: &mut Reader<'_>,
    tag: ObjectType,
) -> Result<TypedValue, ChunkDecodeError> {
    Ok(match tag {
        ObjectType::Null => TypedValue::Null,
        ObjectType::Bool => TypedValue::Bool(reader.u8()? != 0),
        ObjectType::Int32 => TypedValue::Int32(reader.i32()?),
        ObjectType::Int64 => TypedValue::Int64(reader.i64()?),
        ObjectType::Float64 => TypedValue::Float64(reader.f64()?),
        ObjectType::Timestamp => TypedValue::Timestamp(reader.i64()?),
        ObjectType::Date => TypedValue::Date(reader.i32()?),
        ObjectType::String => TypedValue::String(read_text(reader)?),
        ObjectType::Duration => TypedValue::Duration(read_text(reader)?),
        ObjectType::Url => TypedValue::Url(read_text(reader)?),
        ObjectType::Ref => TypedValue::Ref(read_text(reader)?),
        ObjectType::Binary => {
            let len = reader.u32()? as usize;
            TypedValue::Binary(reader.bytes(len)?.to_vec())
        }
        ObjectType::RefArray => TypedValue::RefArray(read_json(reader)?),
        ObjectType::Json => TypedValue::Json(read_json(reader)?),
        ObjectType::GeoPoint => TypedValue::GeoPoint(GeoPoint {
            lat: reader.f64()?,
            lng: reader.f64()?,
        }),
        ObjectType::GeoPolygon => TypedValue::GeoPolygon(read_json(reader)?),
        ObjectType::GeoLineString => TypedValue::GeoLineString(read_json(reader)?),
    })
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_json<T: serde::Serialize>(out: &mut Vec<u8>, value: &T) {
    write_blob(out, &serde_json::to_vec(value).unwrap_or_default());
}

fn read_text(reader: &mut Reader<'_>) -> Result<String, ChunkDecodeError> {
    let len = reader.u32()? as usize;
    std::str::from_utf8(reader.bytes(len)?)
        .map(str::to_string)
        .map_err(|_| ChunkDecodeError::ColumnCorrupt("non-UTF-8 text value".into()))
}

fn read_json<T: for<'de> serde::Deserialize<'de>>(
    reader: &mut Reader<'_>,
) -> Result<T, ChunkDecodeError> {
    let len = reader.u32()? as usize;
    serde_json::from_slice(reader.bytes(len)?)
        .map_err(|e| ChunkDecodeError::ColumnCorrupt(format!("bad JSON value: {}", e)))
}

// =============================================================================
// Bounds-checked reader
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn with_offset(buf: &'a [u8], pos: usize) -> Self {
        Reader { buf, pos }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ChunkDecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(ChunkDecodeError::Truncated {
                needed: n,
                offset: self.pos,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ChunkDecodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ChunkDecodeError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    fn u32(&mut self) -> Result<u32, ChunkDecodeError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    fn u64(&mut self) -> Result<u64, ChunkDecodeError> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    fn i32(&mut self) -> Result<i32, ChunkDecodeError> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    fn i64(&mut self) -> Result<i64, ChunkDecodeError> {
        Ok(LittleEndian::read_i64(self.bytes(8)?))
    }

    fn f64(&mut self) -> Result<f64, ChunkDecodeError> {
        Ok(LittleEndian::read_f64(self.bytes(8)?))
    }
}
