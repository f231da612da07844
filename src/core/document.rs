//! # Document Model
//!
//! Ordered, self-describing key/value container exchanged with the server.
//!
//! A [`Document`] is a list of `(key, value)` pairs, not a map: keys may repeat
//! and insertion order is kept, because the wire format allows both and the
//! server reads the first key of a command as its name.
//!
//! ## Example
//! ```rust
//! use docwire::doc;
//! use docwire::core::document::Value;
//!
//! let mut cmd = doc! { "find" => "users", "limit" => 10 };
//! cmd.set("limit", 20);
//!
//! assert_eq!(cmd.first_key(), Some("find"));
//! assert_eq!(cmd.get_i32("limit").unwrap(), 10);
//! assert_eq!(cmd.get_all("limit").count(), 2);
//! assert!(cmd.get_str("limit").is_err());
//! assert_eq!(Value::from_integer(1 << 40), Value::Int64(1 << 40));
//! ```

use std::fmt;

use chrono::{TimeZone, Utc};

use crate::core::oid::ObjectId;
use crate::error::{DriverError, Result};

/// Wire type tags, one per [`Value`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Double,
    String,
    Document,
    Array,
    Binary,
    Undefined,
    ObjectId,
    Boolean,
    DateTime,
    Null,
    Regex,
    DbPointer,
    JavaScriptCode,
    Symbol,
    JavaScriptCodeWithScope,
    Int32,
    Timestamp,
    Int64,
    Decimal128,
    MinKey,
    MaxKey,
}

impl ElementType {
    /// Get the tag byte for the wire format
    pub fn tag(self) -> u8 {
        match self {
            ElementType::Double => 0x01,
            ElementType::String => 0x02,
            ElementType::Document => 0x03,
            ElementType::Array => 0x04,
            ElementType::Binary => 0x05,
            ElementType::Undefined => 0x06,
            ElementType::ObjectId => 0x07,
            ElementType::Boolean => 0x08,
            ElementType::DateTime => 0x09,
            ElementType::Null => 0x0A,
            ElementType::Regex => 0x0B,
            ElementType::DbPointer => 0x0C,
            ElementType::JavaScriptCode => 0x0D,
            ElementType::Symbol => 0x0E,
            ElementType::JavaScriptCodeWithScope => 0x0F,
            ElementType::Int32 => 0x10,
            ElementType::Timestamp => 0x11,
            ElementType::Int64 => 0x12,
            ElementType::Decimal128 => 0x13,
            ElementType::MinKey => 0xFF,
            ElementType::MaxKey => 0x7F,
        }
    }

    /// Resolve a tag byte, `None` for unknown tags
    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            0x01 => ElementType::Double,
            0x02 => ElementType::String,
            0x03 => ElementType::Document,
            0x04 => ElementType::Array,
            0x05 => ElementType::Binary,
            0x06 => ElementType::Undefined,
            0x07 => ElementType::ObjectId,
            0x08 => ElementType::Boolean,
            0x09 => ElementType::DateTime,
            0x0A => ElementType::Null,
            0x0B => ElementType::Regex,
            0x0C => ElementType::DbPointer,
            0x0D => ElementType::JavaScriptCode,
            0x0E => ElementType::Symbol,
            0x0F => ElementType::JavaScriptCodeWithScope,
            0x10 => ElementType::Int32,
            0x11 => ElementType::Timestamp,
            0x12 => ElementType::Int64,
            0x13 => ElementType::Decimal128,
            0xFF => ElementType::MinKey,
            0x7F => ElementType::MaxKey,
            _ => return None,
        };
        Some(ty)
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Double => "double",
            ElementType::String => "string",
            ElementType::Document => "document",
            ElementType::Array => "array",
            ElementType::Binary => "binary",
            ElementType::Undefined => "undefined",
            ElementType::ObjectId => "objectId",
            ElementType::Boolean => "bool",
            ElementType::DateTime => "date",
            ElementType::Null => "null",
            ElementType::Regex => "regex",
            ElementType::DbPointer => "dbPointer",
            ElementType::JavaScriptCode => "javascript",
            ElementType::Symbol => "symbol",
            ElementType::JavaScriptCodeWithScope => "javascriptWithScope",
            ElementType::Int32 => "int",
            ElementType::Timestamp => "timestamp",
            ElementType::Int64 => "long",
            ElementType::Decimal128 => "decimal",
            ElementType::MinKey => "minKey",
            ElementType::MaxKey => "maxKey",
        }
    }
}

/// Binary payload with its subtype byte
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub const GENERIC: u8 = 0x00;
    pub const FUNCTION: u8 = 0x01;
    /// Deprecated subtype whose payload repeats its own length
    pub const BINARY_OLD: u8 = 0x02;
    pub const UUID_OLD: u8 = 0x03;
    pub const UUID: u8 = 0x04;
    pub const MD5: u8 = 0x05;
    pub const USER_DEFINED: u8 = 0x80;

    pub fn new(subtype: u8, bytes: Vec<u8>) -> Self {
        Self { subtype, bytes }
    }

    /// Generic (subtype 0) binary
    pub fn generic(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Self::GENERIC, bytes.into())
    }
}

/// Regular expression stored as pattern plus option flags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

impl Regex {
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            options: options.into(),
        }
    }
}

/// Internal replication timestamp: seconds plus an ordinal within the second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }
}

/// UTC datetime in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateTime(i64);

impl DateTime {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// Convert to a chrono datetime; `None` when out of chrono's range
    pub fn to_chrono(self) -> Option<chrono::DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(dt: chrono::DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

/// IEEE 754-2008 128-bit decimal, kept as raw little-endian bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    bytes: [u8; 16],
}

impl Decimal128 {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> [u8; 16] {
        self.bytes
    }
}

/// Deprecated JavaScript code with a scope document
#[derive(Debug, Clone, PartialEq)]
pub struct JavaScriptCodeWithScope {
    pub code: String,
    pub scope: Document,
}

/// Deprecated reference to a document in another namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbPointer {
    pub namespace: String,
    pub id: ObjectId,
}

/// A single value inside a [`Document`]
#[derive(Debug, Clone)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Array(Vec<Value>),
    Binary(Binary),
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(DateTime),
    Null,
    Regex(Regex),
    DbPointer(DbPointer),
    JavaScriptCode(String),
    Symbol(String),
    JavaScriptCodeWithScope(JavaScriptCodeWithScope),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

// Doubles compare by bit pattern as well, so a decoded NaN equals the NaN that was encoded
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Double(a), Double(b)) => a == b || a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Document(a), Document(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (Undefined, Undefined) => true,
            (ObjectId(a), ObjectId(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Null, Null) => true,
            (Regex(a), Regex(b)) => a == b,
            (DbPointer(a), DbPointer(b)) => a == b,
            (JavaScriptCode(a), JavaScriptCode(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (JavaScriptCodeWithScope(a), JavaScriptCodeWithScope(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Decimal128(a), Decimal128(b)) => a == b,
            (MinKey, MinKey) => true,
            (MaxKey, MaxKey) => true,
            _ => false,
        }
    }
}

impl Value {
    /// Pick the narrowest integer tag that holds `n`
    pub fn from_integer(n: i64) -> Self {
        match i32::try_from(n) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(n),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Double(_) => ElementType::Double,
            Value::String(_) => ElementType::String,
            Value::Document(_) => ElementType::Document,
            Value::Array(_) => ElementType::Array,
            Value::Binary(_) => ElementType::Binary,
            Value::Undefined => ElementType::Undefined,
            Value::ObjectId(_) => ElementType::ObjectId,
            Value::Boolean(_) => ElementType::Boolean,
            Value::DateTime(_) => ElementType::DateTime,
            Value::Null => ElementType::Null,
            Value::Regex(_) => ElementType::Regex,
            Value::DbPointer(_) => ElementType::DbPointer,
            Value::JavaScriptCode(_) => ElementType::JavaScriptCode,
            Value::Symbol(_) => ElementType::Symbol,
            Value::JavaScriptCodeWithScope(_) => ElementType::JavaScriptCodeWithScope,
            Value::Int32(_) => ElementType::Int32,
            Value::Timestamp(_) => ElementType::Timestamp,
            Value::Int64(_) => ElementType::Int64,
            Value::Decimal128(_) => ElementType::Decimal128,
            Value::MinKey => ElementType::MinKey,
            Value::MaxKey => ElementType::MaxKey,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.element_type().name()
    }

    fn mismatch(&self, expected: ElementType) -> DriverError {
        DriverError::TypeMismatch {
            expected: expected.name(),
            found: self.type_name(),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Double)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(other.mismatch(ElementType::String)),
        }
    }

    pub fn as_document(&self) -> Result<&Document> {
        match self {
            Value::Document(v) => Ok(v),
            other => Err(other.mismatch(ElementType::Document)),
        }
    }

    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(v) => Ok(v),
            other => Err(other.mismatch(ElementType::Array)),
        }
    }

    pub fn as_binary(&self) -> Result<&Binary> {
        match self {
            Value::Binary(v) => Ok(v),
            other => Err(other.mismatch(ElementType::Binary)),
        }
    }

    pub fn as_object_id(&self) -> Result<ObjectId> {
        match self {
            Value::ObjectId(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::ObjectId)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Boolean(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Boolean)),
        }
    }

    pub fn as_datetime(&self) -> Result<DateTime> {
        match self {
            Value::DateTime(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::DateTime)),
        }
    }

    pub fn as_regex(&self) -> Result<&Regex> {
        match self {
            Value::Regex(v) => Ok(v),
            other => Err(other.mismatch(ElementType::Regex)),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Value::Int32(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Int32)),
        }
    }

    pub fn as_timestamp(&self) -> Result<Timestamp> {
        match self {
            Value::Timestamp(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Timestamp)),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int64(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Int64)),
        }
    }

    pub fn as_decimal128(&self) -> Result<Decimal128> {
        match self {
            Value::Decimal128(v) => Ok(*v),
            other => Err(other.mismatch(ElementType::Decimal128)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Binary> for Value {
    fn from(v: Binary) -> Self {
        Value::Binary(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime> for Value {
    fn from(v: DateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Regex> for Value {
    fn from(v: Regex) -> Self {
        Value::Regex(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<Decimal128> for Value {
    fn from(v: Decimal128) -> Self {
        Value::Decimal128(v)
    }
}

impl From<JavaScriptCodeWithScope> for Value {
    fn from(v: JavaScriptCodeWithScope) -> Self {
        Value::JavaScriptCodeWithScope(v)
    }
}

impl From<DbPointer> for Value {
    fn from(v: DbPointer) -> Self {
        Value::DbPointer(v)
    }
}

/// Ordered list of key/value pairs; duplicate keys are kept
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a pair. An existing entry with the same key is left in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Insert a pair at the front
    pub fn prepend(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(0, (key.into(), value.into()));
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Every value stored under `key`, in insertion order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Remove every entry stored under `key`, returning the first removed value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let mut first = None;
        let mut kept = Vec::with_capacity(self.entries.len());
        for (k, v) in self.entries.drain(..) {
            if k == key {
                if first.is_none() {
                    first = Some(v);
                }
            } else {
                kept.push((k, v));
            }
        }
        self.entries = kept;
        first
    }

    /// Key names in insertion order; call again to restart
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            inner: self.entries.iter(),
        }
    }

    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    pub fn to_ordered_pairs(&self) -> Vec<(String, Value)> {
        self.entries.clone()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| DriverError::KeyNotFound(key.to_owned()))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.require(key)?.as_f64()
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.require(key)?.as_str()
    }

    pub fn get_document(&self, key: &str) -> Result<&Document> {
        self.require(key)?.as_document()
    }

    pub fn get_array(&self, key: &str) -> Result<&[Value]> {
        self.require(key)?.as_array()
    }

    pub fn get_binary(&self, key: &str) -> Result<&Binary> {
        self.require(key)?.as_binary()
    }

    pub fn get_object_id(&self, key: &str) -> Result<ObjectId> {
        self.require(key)?.as_object_id()
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.require(key)?.as_bool()
    }

    pub fn get_datetime(&self, key: &str) -> Result<DateTime> {
        self.require(key)?.as_datetime()
    }

    pub fn get_i32(&self, key: &str) -> Result<i32> {
        self.require(key)?.as_i32()
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.require(key)?.as_i64()
    }

    pub fn get_timestamp(&self, key: &str) -> Result<Timestamp> {
        self.require(key)?.as_timestamp()
    }
}

/// Lazy iterator over key names, see [`Document::keys`]
#[derive(Clone)]
pub struct Keys<'a> {
    inner: std::slice::Iter<'a, (String, Value)>,
}

impl<'a> Iterator for Keys<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k.as_str())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Keys<'_> {}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a (String, Value);
    type IntoIter = std::slice::Iter<'a, (String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Document {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

// Relaxed extended-JSON style rendering, for logs and diagnostics
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{v:?}"),
            Value::String(v) => write_json_string(f, v),
            Value::Document(v) => write!(f, "{v}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Binary(b) => write!(
                f,
                "{{\"$binary\": {{\"base64\": \"{}\", \"subType\": \"{:02x}\"}}}}",
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &b.bytes),
                b.subtype
            ),
            Value::Undefined => f.write_str("{\"$undefined\": true}"),
            Value::ObjectId(id) => write!(f, "{{\"$oid\": \"{id}\"}}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::DateTime(dt) => match dt.to_chrono() {
                Some(c) => write!(f, "{{\"$date\": \"{}\"}}", c.to_rfc3339()),
                None => write!(f, "{{\"$date\": {}}}", dt.timestamp_millis()),
            },
            Value::Null => f.write_str("null"),
            Value::Regex(r) => {
                write!(f, "{{\"$regex\": ")?;
                write_json_string(f, &r.pattern)?;
                write!(f, ", \"$options\": \"{}\"}}", r.options)
            }
            Value::DbPointer(p) => {
                write!(f, "{{\"$dbPointer\": {{\"$ref\": ")?;
                write_json_string(f, &p.namespace)?;
                write!(f, ", \"$id\": {{\"$oid\": \"{}\"}}}}}}", p.id)
            }
            Value::JavaScriptCode(code) => {
                f.write_str("{\"$code\": ")?;
                write_json_string(f, code)?;
                f.write_str("}")
            }
            Value::Symbol(s) => {
                f.write_str("{\"$symbol\": ")?;
                write_json_string(f, s)?;
                f.write_str("}")
            }
            Value::JavaScriptCodeWithScope(c) => {
                f.write_str("{\"$code\": ")?;
                write_json_string(f, &c.code)?;
                write!(f, ", \"$scope\": {}}}", c.scope)
            }
            Value::Int32(v) => write!(f, "{v}"),
            Value::Timestamp(ts) => write!(
                f,
                "{{\"$timestamp\": {{\"t\": {}, \"i\": {}}}}}",
                ts.time, ts.increment
            ),
            Value::Int64(v) => write!(f, "{{\"$numberLong\": \"{v}\"}}"),
            Value::Decimal128(d) => write!(f, "{{\"$numberDecimalBytes\": \"{}\"}}", hex::encode(d.bytes())),
            Value::MinKey => f.write_str("{\"$minKey\": 1}"),
            Value::MaxKey => f.write_str("{\"$maxKey\": 1}"),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{ ")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_json_string(f, k)?;
            write!(f, ": {v}")?;
        }
        f.write_str(" }")
    }
}

/// Build a [`Document`] from `key => value` pairs, preserving order
///
/// ```rust
/// use docwire::doc;
///
/// let filter = doc! { "age" => doc! { "$gte" => 18 }, "active" => true };
/// assert_eq!(filter.len(), 2);
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::core::document::Document::new()
    };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::core::document::Document::new();
        $( document.set($key, $value); )+
        document
    }};
}
