//! Wire values exchanged between the mapping layer, the SQL compiler and the
//! connection factory (§3 "Attribute descriptor", §4.2, §4.5).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The datatype classes named in §4.5's "Datatype mapping table" plus the
/// type-handle / enum-like / collection classes §4.2 converts against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    Int8,
    Int16,
    Int32,
    Int64,
    Bytes,
    Float32,
    Float64,
    Boolean,
    /// Arbitrary-precision integer, stored as a decimal string.
    BigInt,
    /// Arbitrary-precision decimal, stored as a decimal string.
    BigDecimal,
    /// `String(max_length)`; `None` means unbounded.
    String(Option<u32>),
    /// Fixed-length enum-like value, stored as its ordinal-prefixed name.
    Enum { ordered: bool },
    /// Fully-qualified or simple type-handle name.
    TypeHandle { omit_namespace: bool },
    /// ISO-8601 period/duration text.
    Duration,
    Timestamp,
    Date,
    Time,
    /// Ordered or unordered collection; elements conform to `element`.
    Collection {
        element: Box<Datatype>,
        ordered: bool,
    },
    /// Key/value map; keys and values each conform to their own datatype.
    Map {
        key: Box<Datatype>,
        value: Box<Datatype>,
    },
    /// The generic "default string" bucket named in §4.2's `map_value`: any
    /// remaining value is stringified into it.
    DefaultString,
}

/// An enum-like value: an ordinal plus its name, so `map_value` can
/// reproduce the `"<ordinal>-<name>"` wire form for ordered enums without
/// needing to re-derive the ordinal from the name (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub ordinal: i64,
    pub name: String,
}

/// A value flowing through the framework: either a normalized attribute
/// value (post `check_attribute_value`) or a wire value bound into SQL
/// (post `map_value`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Arbitrary-precision integer, kept as its canonical decimal text.
    BigInt(String),
    /// Arbitrary-precision decimal, kept as its canonical decimal text.
    BigDecimal(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Enum(EnumValue),
    /// A collection-valued attribute, e.g. for `element_of` binding or a
    /// mapped collection attribute.
    Collection(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The runtime "class" of this value, used by `check_attribute_value`'s
    /// final type-match check (§4.2).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Int8(_) => "i8",
            Value::Int16(_) => "i16",
            Value::Int32(_) => "i32",
            Value::Int64(_) => "i64",
            Value::Float32(_) => "f32",
            Value::Float64(_) => "f64",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::BigInt(_) => "bigint",
            Value::BigDecimal(_) => "bigdecimal",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Enum(_) => "enum",
            Value::Collection(_) => "collection",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[Value]> {
        match self {
            Value::Collection(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::String(s) => write!(f, "{s}"),
            Value::BigInt(s) => write!(f, "{s}"),
            Value::BigDecimal(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Enum(e) => write!(f, "{}-{}", e.ordinal, e.name),
            Value::Collection(items) => {
                let encoded: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", encoded.join(","))
            }
            Value::Map(map) => {
                let json = serde_json::to_string(
                    &map.iter()
                        .map(|(k, v)| (k.clone(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                )
                .unwrap_or_default();
                write!(f, "{json}")
            }
        }
    }
}
