//! Typed value algebra and its two canonical encodings
//!
//! Every triple object is a [`TypedValue`]. Two total, inverse mappings are
//! defined on the algebra:
//!
//! - **row form** ([`ValueRow`]): one type discriminator plus sparse typed
//!   columns. Composite values (JSON, REF_ARRAY, geo polygon/linestring)
//!   encode into the binary column as UTF-8 JSON.
//! - **wire form**: a `{type, value}` JSON object. 64-bit integers and
//!   timestamps serialize as decimal strings to survive JSON number
//!   precision; binary serializes as a byte array; refs may be wrapped as
//!   `{"@ref": "..."}`.
//!
//! Unknown type tags decode to `Null` rather than failing, so a newer writer
//! never wedges an older reader.

use crate::error::{JsonErrorKind, LatticeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// A geographic coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

/// Type tags for the value algebra
///
/// The `u8` representation is the on-disk column discriminator; the string
/// representation is the wire-form `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Absent value
    Null,
    /// Boolean
    Bool,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// IEEE 754 double
    Float64,
    /// UTF-8 string
    String,
    /// Raw bytes
    Binary,
    /// Milliseconds since the Unix epoch
    Timestamp,
    /// Days since the Unix epoch
    Date,
    /// ISO-8601 duration text
    Duration,
    /// Entity URL reference
    Ref,
    /// Array of entity URL references
    RefArray,
    /// Arbitrary JSON document
    Json,
    /// Geographic point
    GeoPoint,
    /// Geographic polygon (closed ring of points)
    GeoPolygon,
    /// Geographic line string
    GeoLineString,
    /// Plain URL value (not a graph reference)
    Url,
}

impl ObjectType {
    /// Stable one-byte discriminator used by the chunk format
    pub fn as_u8(self) -> u8 {
        match self {
            ObjectType::Null => 0,
            ObjectType::Bool => 1,
            ObjectType::Int32 => 2,
            ObjectType::Int64 => 3,
            ObjectType::Float64 => 4,
            ObjectType::String => 5,
            ObjectType::Binary => 6,
            ObjectType::Timestamp => 7,
            ObjectType::Date => 8,
            ObjectType::Duration => 9,
            ObjectType::Ref => 10,
            ObjectType::RefArray => 11,
            ObjectType::Json => 12,
            ObjectType::GeoPoint => 13,
            ObjectType::GeoPolygon => 14,
            ObjectType::GeoLineString => 15,
            ObjectType::Url => 16,
        }
    }

    /// Decode a discriminator byte; unknown bytes map to `Null`
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => ObjectType::Bool,
            2 => ObjectType::Int32,
            3 => ObjectType::Int64,
            4 => ObjectType::Float64,
            5 => ObjectType::String,
            6 => ObjectType::Binary,
            7 => ObjectType::Timestamp,
            8 => ObjectType::Date,
            9 => ObjectType::Duration,
            10 => ObjectType::Ref,
            11 => ObjectType::RefArray,
            12 => ObjectType::Json,
            13 => ObjectType::GeoPoint,
            14 => ObjectType::GeoPolygon,
            15 => ObjectType::GeoLineString,
            16 => ObjectType::Url,
            _ => ObjectType::Null,
        }
    }

    /// The wire-form type name
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Null => "NULL",
            ObjectType::Bool => "BOOL",
            ObjectType::Int32 => "INT32",
            ObjectType::Int64 => "INT64",
            ObjectType::Float64 => "FLOAT64",
            ObjectType::String => "STRING",
            ObjectType::Binary => "BINARY",
            ObjectType::Timestamp => "TIMESTAMP",
            ObjectType::Date => "DATE",
            ObjectType::Duration => "DURATION",
            ObjectType::Ref => "REF",
            ObjectType::RefArray => "REF_ARRAY",
            ObjectType::Json => "JSON",
            ObjectType::GeoPoint => "GEO_POINT",
            ObjectType::GeoPolygon => "GEO_POLYGON",
            ObjectType::GeoLineString => "GEO_LINESTRING",
            ObjectType::Url => "URL",
        }
    }

    /// Parse a wire-form type name; unknown names map to `Null`
    pub fn parse(name: &str) -> Self {
        match name {
            "BOOL" => ObjectType::Bool,
            "INT32" => ObjectType::Int32,
            "INT64" => ObjectType::Int64,
            "FLOAT64" => ObjectType::Float64,
            "STRING" => ObjectType::String,
            "BINARY" => ObjectType::Binary,
            "TIMESTAMP" => ObjectType::Timestamp,
            "DATE" => ObjectType::Date,
            "DURATION" => ObjectType::Duration,
            "REF" => ObjectType::Ref,
            "REF_ARRAY" => ObjectType::RefArray,
            "JSON" => ObjectType::Json,
            "GEO_POINT" => ObjectType::GeoPoint,
            "GEO_POLYGON" => ObjectType::GeoPolygon,
            "GEO_LINESTRING" => ObjectType::GeoLineString,
            "URL" => ObjectType::Url,
            _ => ObjectType::Null,
        }
    }
}

/// A tagged value from the supported algebra
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// IEEE 754 double
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    /// Days since the Unix epoch
    Date(i32),
    /// ISO-8601 duration text
    Duration(String),
    /// Entity URL reference
    Ref(String),
    /// Array of entity URL references
    RefArray(Vec<String>),
    /// Arbitrary JSON document
    Json(Json),
    /// Geographic point
    GeoPoint(GeoPoint),
    /// Geographic polygon
    GeoPolygon(Vec<GeoPoint>),
    /// Geographic line string
    GeoLineString(Vec<GeoPoint>),
    /// Plain URL value
    Url(String),
}

impl TypedValue {
    /// The type tag of this value
    pub fn object_type(&self) -> ObjectType {
        match self {
            TypedValue::Null => ObjectType::Null,
            TypedValue::Bool(_) => ObjectType::Bool,
            TypedValue::Int32(_) => ObjectType::Int32,
            TypedValue::Int64(_) => ObjectType::Int64,
            TypedValue::Float64(_) => ObjectType::Float64,
            TypedValue::String(_) => ObjectType::String,
            TypedValue::Binary(_) => ObjectType::Binary,
            TypedValue::Timestamp(_) => ObjectType::Timestamp,
            TypedValue::Date(_) => ObjectType::Date,
            TypedValue::Duration(_) => ObjectType::Duration,
            TypedValue::Ref(_) => ObjectType::Ref,
            TypedValue::RefArray(_) => ObjectType::RefArray,
            TypedValue::Json(_) => ObjectType::Json,
            TypedValue::GeoPoint(_) => ObjectType::GeoPoint,
            TypedValue::GeoPolygon(_) => ObjectType::GeoPolygon,
            TypedValue::GeoLineString(_) => ObjectType::GeoLineString,
            TypedValue::Url(_) => ObjectType::Url,
        }
    }
}

// =============================================================================
// Row form
// =============================================================================

/// Sparse row representation of a [`TypedValue`]
///
/// One discriminator plus at most a couple of populated columns. This is the
/// shape the columnar chunk format stores and the shape a SQL-ish storage row
/// would use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRow {
    /// Type discriminator
    pub value_type: ObjectType,
    /// STRING, DURATION, URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// INT32, INT64, DATE
    #[serde(skip_serializing_if = "Option::is_none")]
    pub int_value: Option<i64>,
    /// FLOAT64
    #[serde(skip_serializing_if = "Option::is_none")]
    pub float_value: Option<f64>,
    /// BOOL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    /// TIMESTAMP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_value: Option<i64>,
    /// GEO_POINT latitude
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// GEO_POINT longitude
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// REF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_value: Option<String>,
    /// BINARY, and UTF-8 JSON for composite types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<Vec<u8>>,
}

impl Default for ObjectType {
    fn default() -> Self {
        ObjectType::Null
    }
}

impl TypedValue {
    /// Encode into row form
    ///
    /// Total on the algebra; composite values become UTF-8 JSON in the
    /// binary column.
    pub fn to_row(&self) -> ValueRow {
        let mut row = ValueRow {
            value_type: self.object_type(),
            ..ValueRow::default()
        };
        match self {
            TypedValue::Null => {}
            TypedValue::Bool(b) => row.bool_value = Some(*b),
            TypedValue::Int32(i) => row.int_value = Some(*i as i64),
            TypedValue::Int64(i) => row.int_value = Some(*i),
            TypedValue::Float64(f) => row.float_value = Some(*f),
            TypedValue::String(s) => row.string_value = Some(s.clone()),
            TypedValue::Binary(b) => row.binary_value = Some(b.clone()),
            TypedValue::Timestamp(ts) => row.timestamp_value = Some(*ts),
            TypedValue::Date(d) => row.int_value = Some(*d as i64),
            TypedValue::Duration(s) => row.string_value = Some(s.clone()),
            TypedValue::Ref(r) => row.ref_value = Some(r.clone()),
            TypedValue::RefArray(refs) => {
                row.binary_value = Some(to_json_bytes(refs));
            }
            TypedValue::Json(doc) => {
                row.binary_value = Some(to_json_bytes(doc));
            }
            TypedValue::GeoPoint(p) => {
                row.lat = Some(p.lat);
                row.lng = Some(p.lng);
            }
            TypedValue::GeoPolygon(pts) => {
                row.binary_value = Some(to_json_bytes(pts));
            }
            TypedValue::GeoLineString(pts) => {
                row.binary_value = Some(to_json_bytes(pts));
            }
            TypedValue::Url(u) => row.string_value = Some(u.clone()),
        }
        row
    }

    /// Decode from row form
    ///
    /// Inverse of [`TypedValue::to_row`]. A row whose discriminator demands a
    /// column that is absent fails with a `MissingField` conversion error.
    pub fn from_row(row: &ValueRow) -> Result<Self> {
        fn missing(col: &str, ty: ObjectType) -> LatticeError {
            LatticeError::json_conversion(
                JsonErrorKind::MissingField,
                format!("{} column required for {}", col, ty.as_str()),
            )
        }

        Ok(match row.value_type {
            ObjectType::Null => TypedValue::Null,
            ObjectType::Bool => TypedValue::Bool(
                row.bool_value
                    .ok_or_else(|| missing("bool", ObjectType::Bool))?,
            ),
            ObjectType::Int32 => {
                let i = row
                    .int_value
                    .ok_or_else(|| missing("int", ObjectType::Int32))?;
                TypedValue::Int32(i32::try_from(i).map_err(|_| {
                    LatticeError::json_conversion(
                        JsonErrorKind::InvalidValue,
                        format!("{} out of i32 range", i),
                    )
                })?)
            }
            ObjectType::Int64 => TypedValue::Int64(
                row.int_value
                    .ok_or_else(|| missing("int", ObjectType::Int64))?,
            ),
            ObjectType::Float64 => TypedValue::Float64(
                row.float_value
                    .ok_or_else(|| missing("float", ObjectType::Float64))?,
            ),
            ObjectType::String => TypedValue::String(
                row.string_value
                    .clone()
                    .ok_or_else(|| missing("string", ObjectType::String))?,
            ),
            ObjectType::Binary => TypedValue::Binary(
                row.binary_value
                    .clone()
                    .ok_or_else(|| missing("binary", ObjectType::Binary))?,
            ),
            ObjectType::Timestamp => TypedValue::Timestamp(
                row.timestamp_value
                    .ok_or_else(|| missing("timestamp", ObjectType::Timestamp))?,
            ),
            ObjectType::Date => {
                let i = row
                    .int_value
                    .ok_or_else(|| missing("int", ObjectType::Date))?;
                TypedValue::Date(i32::try_from(i).map_err(|_| {
                    LatticeError::json_conversion(
                        JsonErrorKind::InvalidValue,
                        format!("{} out of date range", i),
                    )
                })?)
            }
            ObjectType::Duration => TypedValue::Duration(
                row.string_value
                    .clone()
                    .ok_or_else(|| missing("string", ObjectType::Duration))?,
            ),
            ObjectType::Ref => TypedValue::Ref(
                row.ref_value
                    .clone()
                    .ok_or_else(|| missing("ref", ObjectType::Ref))?,
            ),
            ObjectType::RefArray => {
                let bytes = row
                    .binary_value
                    .as_ref()
                    .ok_or_else(|| missing("binary", ObjectType::RefArray))?;
                TypedValue::RefArray(from_json_bytes(bytes)?)
            }
            ObjectType::Json => {
                let bytes = row
                    .binary_value
                    .as_ref()
                    .ok_or_else(|| missing("binary", ObjectType::Json))?;
                TypedValue::Json(from_json_bytes(bytes)?)
            }
            ObjectType::GeoPoint => {
                let lat = row.lat.ok_or_else(|| missing("lat", ObjectType::GeoPoint))?;
                let lng = row.lng.ok_or_else(|| missing("lng", ObjectType::GeoPoint))?;
                TypedValue::GeoPoint(GeoPoint { lat, lng })
            }
            ObjectType::GeoPolygon => {
                let bytes = row
                    .binary_value
                    .as_ref()
                    .ok_or_else(|| missing("binary", ObjectType::GeoPolygon))?;
                TypedValue::GeoPolygon(from_json_bytes(bytes)?)
            }
            ObjectType::GeoLineString => {
                let bytes = row
                    .binary_value
                    .as_ref()
                    .ok_or_else(|| missing("binary", ObjectType::GeoLineString))?;
                TypedValue::GeoLineString(from_json_bytes(bytes)?)
            }
            ObjectType::Url => TypedValue::Url(
                row.string_value
                    .clone()
                    .ok_or_else(|| missing("string", ObjectType::Url))?,
            ),
        })
    }

    // =========================================================================
    // Wire form
    // =========================================================================

    /// Encode into the wire form `{type, value}` JSON object
    ///
    /// INT64 and TIMESTAMP values serialize as decimal strings so 64-bit
    /// precision survives JSON number handling; BINARY serializes as a byte
    /// array; REF wraps its target as `{"@ref": "..."}`.
    pub fn to_wire(&self) -> Json {
        let value = match self {
            TypedValue::Null => Json::Null,
            TypedValue::Bool(b) => json!(b),
            TypedValue::Int32(i) => json!(i),
            TypedValue::Int64(i) => json!(i.to_string()),
            TypedValue::Float64(f) => json!(f),
            TypedValue::String(s) => json!(s),
            TypedValue::Binary(b) => json!(b),
            TypedValue::Timestamp(ts) => json!(ts.to_string()),
            TypedValue::Date(d) => json!(d),
            TypedValue::Duration(s) => json!(s),
            TypedValue::Ref(r) => json!({ "@ref": r }),
            TypedValue::RefArray(refs) => json!(refs),
            TypedValue::Json(doc) => doc.clone(),
            TypedValue::GeoPoint(p) => json!({ "lat": p.lat, "lng": p.lng }),
            TypedValue::GeoPolygon(pts) => serde_json::to_value(pts).unwrap_or(Json::Null),
            TypedValue::GeoLineString(pts) => serde_json::to_value(pts).unwrap_or(Json::Null),
            TypedValue::Url(u) => json!(u),
        };
        json!({ "type": self.object_type().as_str(), "value": value })
    }

    /// Decode from the wire form
    ///
    /// Accepts decimal strings or numbers for 64-bit integer types and both
    /// plain strings and `{"@ref": ...}` wrappers for REF. Unknown type tags
    /// decode to `Null`.
    pub fn from_wire(wire: &Json) -> Result<Self> {
        let obj = wire.as_object().ok_or_else(|| {
            LatticeError::json_conversion(JsonErrorKind::InvalidInput, "expected {type, value}")
        })?;
        let type_name = obj
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| {
                LatticeError::json_conversion(JsonErrorKind::MissingField, "type field required")
            })?;
        let value = obj.get("value").unwrap_or(&Json::Null);
        let ty = ObjectType::parse(type_name);

        fn bad(ty: ObjectType, value: &Json) -> LatticeError {
            LatticeError::json_conversion(
                JsonErrorKind::InvalidType,
                format!("{} cannot decode {}", ty.as_str(), value),
            )
        }

        Ok(match ty {
            ObjectType::Null => TypedValue::Null,
            ObjectType::Bool => TypedValue::Bool(value.as_bool().ok_or_else(|| bad(ty, value))?),
            ObjectType::Int32 => {
                let i = json_to_i64(value).ok_or_else(|| bad(ty, value))?;
                TypedValue::Int32(i32::try_from(i).map_err(|_| {
                    LatticeError::json_conversion(
                        JsonErrorKind::InvalidValue,
                        format!("{} out of i32 range", i),
                    )
                })?)
            }
            ObjectType::Int64 => {
                TypedValue::Int64(json_to_i64(value).ok_or_else(|| bad(ty, value))?)
            }
            ObjectType::Float64 => {
                TypedValue::Float64(value.as_f64().ok_or_else(|| bad(ty, value))?)
            }
            ObjectType::String => {
                TypedValue::String(value.as_str().ok_or_else(|| bad(ty, value))?.to_string())
            }
            ObjectType::Binary => {
                let arr = value.as_array().ok_or_else(|| bad(ty, value))?;
                let mut bytes = Vec::with_capacity(arr.len());
                for item in arr {
                    let b = item
                        .as_u64()
                        .filter(|b| *b <= u8::MAX as u64)
                        .ok_or_else(|| bad(ty, value))?;
                    bytes.push(b as u8);
                }
                TypedValue::Binary(bytes)
            }
            ObjectType::Timestamp => {
                TypedValue::Timestamp(json_to_i64(value).ok_or_else(|| bad(ty, value))?)
            }
            ObjectType::Date => {
                let i = json_to_i64(value).ok_or_else(|| bad(ty, value))?;
                TypedValue::Date(i32::try_from(i).map_err(|_| {
                    LatticeError::json_conversion(
                        JsonErrorKind::InvalidValue,
                        format!("{} out of date range", i),
                    )
                })?)
            }
            ObjectType::Duration => {
                TypedValue::Duration(value.as_str().ok_or_else(|| bad(ty, value))?.to_string())
            }
            ObjectType::Ref => {
                let target = value
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| {
                        value
                            .as_object()
                            .and_then(|o| o.get("@ref"))
                            .and_then(Json::as_str)
                            .map(str::to_string)
                    })
                    .ok_or_else(|| bad(ty, value))?;
                TypedValue::Ref(target)
            }
            ObjectType::RefArray => {
                TypedValue::RefArray(serde_json::from_value(value.clone()).map_err(|_| bad(ty, value))?)
            }
            ObjectType::Json => TypedValue::Json(value.clone()),
            ObjectType::GeoPoint => {
                let p: GeoPoint =
                    serde_json::from_value(value.clone()).map_err(|_| bad(ty, value))?;
                TypedValue::GeoPoint(p)
            }
            ObjectType::GeoPolygon => TypedValue::GeoPolygon(
                serde_json::from_value(value.clone()).map_err(|_| bad(ty, value))?,
            ),
            ObjectType::GeoLineString => TypedValue::GeoLineString(
                serde_json::from_value(value.clone()).map_err(|_| bad(ty, value))?,
            ),
            ObjectType::Url => {
                TypedValue::Url(value.as_str().ok_or_else(|| bad(ty, value))?.to_string())
            }
        })
    }
}

fn to_json_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn from_json_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        LatticeError::json_conversion(JsonErrorKind::InvalidValue, format!("bad JSON column: {}", e))
    })
}

fn json_to_i64(value: &Json) -> Option<i64> {
    match value {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<TypedValue> {
        vec![
            TypedValue::Null,
            TypedValue::Bool(true),
            TypedValue::Int32(-7),
            TypedValue::Int64(9_007_199_254_740_993), // above 2^53, breaks f64 JSON numbers
            TypedValue::Float64(3.5),
            TypedValue::String("hello".into()),
            TypedValue::Binary(vec![0, 1, 254, 255]),
            TypedValue::Timestamp(1_705_276_800_123),
            TypedValue::Date(19_737),
            TypedValue::Duration("P3DT4H".into()),
            TypedValue::Ref("https://example.com/users/1".into()),
            TypedValue::RefArray(vec![
                "https://example.com/users/1".into(),
                "https://example.com/users/2".into(),
            ]),
            TypedValue::Json(json!({"a": [1, 2, {"b": null}]})),
            TypedValue::GeoPoint(GeoPoint {
                lat: 48.8566,
                lng: 2.3522,
            }),
            TypedValue::GeoPolygon(vec![
                GeoPoint { lat: 0.0, lng: 0.0 },
                GeoPoint { lat: 0.0, lng: 1.0 },
                GeoPoint { lat: 1.0, lng: 1.0 },
            ]),
            TypedValue::GeoLineString(vec![
                GeoPoint { lat: 1.5, lng: 2.5 },
                GeoPoint { lat: 3.5, lng: 4.5 },
            ]),
            TypedValue::Url("https://example.com/page".into()),
        ]
    }

    #[test]
    fn test_row_round_trip_all_types() {
        for v in sample_values() {
            let row = v.to_row();
            assert_eq!(row.value_type, v.object_type());
            let back = TypedValue::from_row(&row).unwrap();
            assert_eq!(back, v, "row round trip failed for {:?}", v.object_type());
        }
    }

    #[test]
    fn test_wire_round_trip_all_types() {
        for v in sample_values() {
            let wire = v.to_wire();
            let back = TypedValue::from_wire(&wire).unwrap();
            assert_eq!(back, v, "wire round trip failed for {:?}", v.object_type());
        }
    }

    #[test]
    fn test_wire_int64_is_decimal_string() {
        let wire = TypedValue::Int64(i64::MAX).to_wire();
        assert_eq!(wire["value"], json!(i64::MAX.to_string()));
        let wire = TypedValue::Timestamp(1_705_276_800_123).to_wire();
        assert_eq!(wire["value"], json!("1705276800123"));
    }

    #[test]
    fn test_wire_ref_is_wrapped() {
        let wire = TypedValue::Ref("https://example.com/x".into()).to_wire();
        assert_eq!(wire["value"]["@ref"], json!("https://example.com/x"));
        // Plain string refs are also accepted on decode
        let plain = json!({"type": "REF", "value": "https://example.com/x"});
        assert_eq!(
            TypedValue::from_wire(&plain).unwrap(),
            TypedValue::Ref("https://example.com/x".into())
        );
    }

    #[test]
    fn test_wire_accepts_numeric_int64() {
        let wire = json!({"type": "INT64", "value": 42});
        assert_eq!(TypedValue::from_wire(&wire).unwrap(), TypedValue::Int64(42));
    }

    #[test]
    fn test_unknown_type_tag_decodes_to_null() {
        let wire = json!({"type": "QUATERNION", "value": [1, 2, 3, 4]});
        assert_eq!(TypedValue::from_wire(&wire).unwrap(), TypedValue::Null);
        assert_eq!(ObjectType::from_u8(200), ObjectType::Null);
    }

    #[test]
    fn test_row_missing_column_fails() {
        let row = ValueRow {
            value_type: ObjectType::Int64,
            ..ValueRow::default()
        };
        let err = TypedValue::from_row(&row).unwrap_err();
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_row_int32_range_check() {
        let row = ValueRow {
            value_type: ObjectType::Int32,
            int_value: Some(i64::MAX),
            ..ValueRow::default()
        };
        assert!(TypedValue::from_row(&row).is_err());
    }

    #[test]
    fn test_object_type_tag_round_trip() {
        for tag in 0u8..17 {
            let ty = ObjectType::from_u8(tag);
            assert_eq!(ty.as_u8(), tag);
            assert_eq!(ObjectType::parse(ty.as_str()), ty);
        }
    }

    #[test]
    fn test_wire_type_mismatch_fails() {
        let wire = json!({"type": "BOOL", "value": "yes"});
        let err = TypedValue::from_wire(&wire).unwrap_err();
        assert!(err.to_string().contains("invalid type"));
    }

    #[test]
    fn test_geo_point_tolerance() {
        let v = TypedValue::GeoPoint(GeoPoint {
            lat: 51.507222,
            lng: -0.1275,
        });
        let back = TypedValue::from_wire(&v.to_wire()).unwrap();
        match back {
            TypedValue::GeoPoint(p) => {
                assert!((p.lat - 51.507222).abs() < 1e-6);
                assert!((p.lng + 0.1275).abs() < 1e-6);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
