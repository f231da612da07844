//! # Document Codec
//!
//! Converts [`Document`]s to and from the length-prefixed binary format.
//!
//! ## Layout
//! ```text
//! document := [Length i32 LE] element* [0x00]
//! element  := [Tag u8] [Key cstring] [Payload]
//! string   := [Length i32 LE incl. NUL] [UTF-8] [0x00]
//! ```
//!
//! Decoding is all-or-nothing: any malformed byte fails the whole document.
//! A declared length larger than the input is [`TruncatedInput`]; a declared
//! length that disagrees with the content it frames is [`LengthMismatch`].
//!
//! [`TruncatedInput`]: crate::error::EncodingErrorKind::TruncatedInput
//! [`LengthMismatch`]: crate::error::EncodingErrorKind::LengthMismatch

use bytes::BufMut;

use crate::core::document::{
    Binary, DateTime, DbPointer, Decimal128, Document, ElementType, JavaScriptCodeWithScope,
    Regex, Timestamp, Value,
};
use crate::core::oid::ObjectId;
use crate::error::{DriverError, EncodingErrorKind, Result};

/// Deepest container nesting accepted on encode or decode
pub const MAX_NESTING_DEPTH: usize = 100;

/// Smallest possible document: length prefix plus terminator
pub const MIN_DOCUMENT_SIZE: usize = 5;

fn err(kind: EncodingErrorKind, message: impl Into<String>) -> DriverError {
    DriverError::encoding(kind, message)
}

/// Encode a document into a fresh buffer
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(encoded_len(doc));
    encode_document_into(doc, &mut buf)?;
    Ok(buf)
}

/// Encode a document, failing with `DocumentTooLarge` past `max_size` bytes
pub fn encode_document_with_limit(doc: &Document, max_size: usize) -> Result<Vec<u8>> {
    let size = encoded_len(doc);
    if size > max_size {
        return Err(err(
            EncodingErrorKind::DocumentTooLarge,
            format!("document is {size} bytes, limit is {max_size}"),
        ));
    }
    encode_document(doc)
}

/// Append the encoded document to `buf`
pub fn encode_document_into(doc: &Document, buf: &mut Vec<u8>) -> Result<()> {
    write_document(buf, doc, 0)
}

/// Exact encoded size of a document, without encoding it.
///
/// Containers nested past [`MAX_NESTING_DEPTH`] are not walked; such a
/// document cannot be encoded and its size is only a lower bound.
pub fn encoded_len(doc: &Document) -> usize {
    document_len(doc, 0)
}

fn document_len(doc: &Document, depth: usize) -> usize {
    if depth > MAX_NESTING_DEPTH {
        return MIN_DOCUMENT_SIZE;
    }
    4 + doc
        .iter()
        .map(|(k, v)| 1 + k.len() + 1 + value_len(v, depth))
        .sum::<usize>()
        + 1
}

fn string_len(s: &str) -> usize {
    4 + s.len() + 1
}

fn value_len(value: &Value, depth: usize) -> usize {
    match value {
        Value::Double(_) | Value::DateTime(_) | Value::Int64(_) | Value::Timestamp(_) => 8,
        Value::String(s) | Value::JavaScriptCode(s) | Value::Symbol(s) => string_len(s),
        Value::Document(d) => document_len(d, depth + 1),
        Value::Array(_) if depth + 1 > MAX_NESTING_DEPTH => MIN_DOCUMENT_SIZE,
        Value::Array(items) => {
            4 + items
                .iter()
                .enumerate()
                .map(|(i, v)| 1 + decimal_digits(i) + 1 + value_len(v, depth + 1))
                .sum::<usize>()
                + 1
        }
        Value::Binary(b) => {
            let extra = if b.subtype == Binary::BINARY_OLD { 4 } else { 0 };
            4 + 1 + extra + b.bytes.len()
        }
        Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => 0,
        Value::ObjectId(_) => 12,
        Value::Boolean(_) => 1,
        Value::Regex(r) => r.pattern.len() + 1 + r.options.len() + 1,
        Value::DbPointer(p) => string_len(&p.namespace) + 12,
        Value::JavaScriptCodeWithScope(c) => {
            4 + string_len(&c.code) + document_len(&c.scope, depth + 1)
        }
        Value::Int32(_) => 4,
        Value::Decimal128(_) => 16,
    }
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn patch_length(buf: &mut [u8], start: usize) -> Result<()> {
    let len = buf.len() - start;
    let len = i32::try_from(len).map_err(|_| {
        err(
            EncodingErrorKind::DocumentTooLarge,
            format!("encoded length {len} does not fit in i32"),
        )
    })?;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_cstring(buf: &mut Vec<u8>, s: &str, what: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(err(
            EncodingErrorKind::InvalidValue,
            format!("{what} contains a NUL byte: {s:?}"),
        ));
    }
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = i32::try_from(s.len() + 1).map_err(|_| {
        err(
            EncodingErrorKind::DocumentTooLarge,
            "string length does not fit in i32",
        )
    })?;
    buf.put_i32_le(len);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(err(
            EncodingErrorKind::InvalidValue,
            format!("nesting deeper than {MAX_NESTING_DEPTH} levels"),
        ));
    }
    Ok(())
}

fn write_document(buf: &mut Vec<u8>, doc: &Document, depth: usize) -> Result<()> {
    check_depth(depth)?;
    let start = buf.len();
    buf.put_i32_le(0);
    for (key, value) in doc {
        write_element(buf, key, value, depth)?;
    }
    buf.put_u8(0);
    patch_length(buf, start)
}

fn write_array(buf: &mut Vec<u8>, items: &[Value], depth: usize) -> Result<()> {
    check_depth(depth)?;
    let start = buf.len();
    buf.put_i32_le(0);
    for (index, value) in items.iter().enumerate() {
        write_element(buf, &index.to_string(), value, depth)?;
    }
    buf.put_u8(0);
    patch_length(buf, start)
}

fn write_element(buf: &mut Vec<u8>, key: &str, value: &Value, depth: usize) -> Result<()> {
    buf.put_u8(value.element_type().tag());
    write_cstring(buf, key, "key")?;
    match value {
        Value::Double(v) => buf.put_f64_le(*v),
        Value::String(s) | Value::JavaScriptCode(s) | Value::Symbol(s) => write_string(buf, s)?,
        Value::Document(d) => write_document(buf, d, depth + 1)?,
        Value::Array(items) => write_array(buf, items, depth + 1)?,
        Value::Binary(b) => {
            let inner = i32::try_from(b.bytes.len()).map_err(|_| {
                err(EncodingErrorKind::DocumentTooLarge, "binary payload too large")
            })?;
            if b.subtype == Binary::BINARY_OLD {
                buf.put_i32_le(inner + 4);
                buf.put_u8(b.subtype);
                buf.put_i32_le(inner);
            } else {
                buf.put_i32_le(inner);
                buf.put_u8(b.subtype);
            }
            buf.put_slice(&b.bytes);
        }
        Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => {}
        Value::ObjectId(id) => buf.put_slice(&id.bytes()),
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::DateTime(dt) => buf.put_i64_le(dt.timestamp_millis()),
        Value::Regex(r) => {
            write_cstring(buf, &r.pattern, "regex pattern")?;
            write_cstring(buf, &r.options, "regex options")?;
        }
        Value::DbPointer(p) => {
            write_string(buf, &p.namespace)?;
            buf.put_slice(&p.id.bytes());
        }
        Value::JavaScriptCodeWithScope(c) => {
            let start = buf.len();
            buf.put_i32_le(0);
            write_string(buf, &c.code)?;
            write_document(buf, &c.scope, depth + 1)?;
            patch_length(buf, start)?;
        }
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::Timestamp(ts) => {
            buf.put_u32_le(ts.increment);
            buf.put_u32_le(ts.time);
        }
        Value::Int64(v) => buf.put_i64_le(*v),
        Value::Decimal128(d) => buf.put_slice(&d.bytes()),
    }
    Ok(())
}

/// Decode exactly one document; trailing bytes are a `LengthMismatch`
pub fn decode_document(input: &[u8]) -> Result<Document> {
    let (doc, consumed) = decode_document_prefix(input)?;
    if consumed != input.len() {
        return Err(err(
            EncodingErrorKind::LengthMismatch,
            format!(
                "{} trailing bytes after document of {consumed} bytes",
                input.len() - consumed
            ),
        ));
    }
    Ok(doc)
}

/// Decode the document at the start of `input`, returning it and its length
pub fn decode_document_prefix(input: &[u8]) -> Result<(Document, usize)> {
    let declared = read_length_prefix(input)?;
    if declared > input.len() {
        return Err(err(
            EncodingErrorKind::TruncatedInput,
            format!(
                "document declares {declared} bytes, only {} available",
                input.len()
            ),
        ));
    }
    let mut reader = Reader::new(&input[..declared]);
    let doc = reader.read_document_body(0)?;
    Ok((doc, declared))
}

/// Decode every document in a back-to-back sequence
pub fn decode_document_sequence(mut input: &[u8]) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    while !input.is_empty() {
        let (doc, consumed) = decode_document_prefix(input)?;
        docs.push(doc);
        input = &input[consumed..];
    }
    Ok(docs)
}

fn read_length_prefix(input: &[u8]) -> Result<usize> {
    let Some(prefix) = input.get(..4) else {
        return Err(err(
            EncodingErrorKind::TruncatedInput,
            format!("need 4 bytes for a length prefix, have {}", input.len()),
        ));
    };
    let declared = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if declared < MIN_DOCUMENT_SIZE as i32 {
        return Err(err(
            EncodingErrorKind::LengthMismatch,
            format!("declared document length {declared} is below the minimum"),
        ));
    }
    Ok(declared as usize)
}

/// Cursor over one length-bounded document. Reads past the bound mean the
/// declared length disagreed with the content.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(err(
                EncodingErrorKind::LengthMismatch,
                format!(
                    "element at offset {} needs {n} bytes past the declared end",
                    self.pos
                ),
            )),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            err(
                EncodingErrorKind::LengthMismatch,
                "unterminated cstring before the declared end",
            )
        })?;
        let bytes = self.take(nul + 1)?;
        utf8(&bytes[..nul])
    }

    fn string(&mut self) -> Result<String> {
        let len = self.i32()?;
        if len < 1 {
            return Err(err(
                EncodingErrorKind::LengthMismatch,
                format!("string length {len} is below the minimum of 1"),
            ));
        }
        let bytes = self.take(len as usize)?;
        let (body, terminator) = bytes.split_at(bytes.len() - 1);
        if terminator[0] != 0 {
            return Err(err(
                EncodingErrorKind::LengthMismatch,
                "string is not NUL-terminated at its declared length",
            ));
        }
        utf8(body)
    }

    fn sub_reader(&mut self) -> Result<Reader<'a>> {
        let declared = read_length_prefix(&self.buf[self.pos..]).map_err(|e| match e {
            DriverError::Encoding {
                kind: EncodingErrorKind::TruncatedInput,
                message,
            } => err(EncodingErrorKind::LengthMismatch, message),
            other => other,
        })?;
        Ok(Reader::new(self.take(declared)?))
    }

    fn read_document_body(&mut self, depth: usize) -> Result<Document> {
        check_depth(depth)?;
        self.take(4)?;
        let mut doc = Document::new();
        loop {
            let tag = self.u8()?;
            if tag == 0 {
                if self.pos != self.buf.len() {
                    return Err(err(
                        EncodingErrorKind::LengthMismatch,
                        format!(
                            "terminator at offset {} but declared length is {}",
                            self.pos - 1,
                            self.buf.len()
                        ),
                    ));
                }
                return Ok(doc);
            }
            let key = self.cstring()?;
            let value = self.read_value(tag, &key, depth)?;
            doc.set(key, value);
        }
    }

    fn read_embedded_document(&mut self, depth: usize) -> Result<Document> {
        self.sub_reader()?.read_document_body(depth)
    }

    fn read_value(&mut self, tag: u8, key: &str, depth: usize) -> Result<Value> {
        let ty = ElementType::from_tag(tag).ok_or_else(|| {
            err(
                EncodingErrorKind::UnknownTypeTag,
                format!("unknown type tag 0x{tag:02X} for key {key:?}"),
            )
        })?;

        let value = match ty {
            ElementType::Double => Value::Double(self.f64()?),
            ElementType::String => Value::String(self.string()?),
            ElementType::Document => Value::Document(self.read_embedded_document(depth + 1)?),
            ElementType::Array => {
                // Element keys are positional; their text is not checked
                let doc = self.read_embedded_document(depth + 1)?;
                Value::Array(doc.into_iter().map(|(_, v)| v).collect())
            }
            ElementType::Binary => Value::Binary(self.binary()?),
            ElementType::Undefined => Value::Undefined,
            ElementType::ObjectId => Value::ObjectId(ObjectId::from_bytes(self.array()?)),
            ElementType::Boolean => match self.u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(err(
                        EncodingErrorKind::InvalidValue,
                        format!("boolean byte 0x{other:02X} for key {key:?}"),
                    ))
                }
            },
            ElementType::DateTime => Value::DateTime(DateTime::from_millis(self.i64()?)),
            ElementType::Null => Value::Null,
            ElementType::Regex => {
                let pattern = self.cstring()?;
                let options = self.cstring()?;
                Value::Regex(Regex { pattern, options })
            }
            ElementType::DbPointer => {
                let namespace = self.string()?;
                let id = ObjectId::from_bytes(self.array()?);
                Value::DbPointer(DbPointer { namespace, id })
            }
            ElementType::JavaScriptCode => Value::JavaScriptCode(self.string()?),
            ElementType::Symbol => Value::Symbol(self.string()?),
            ElementType::JavaScriptCodeWithScope => {
                let start = self.pos;
                let total = self.i32()?;
                let code = self.string()?;
                let scope = self.read_embedded_document(depth + 1)?;
                if total < 0 || self.pos - start != total as usize {
                    return Err(err(
                        EncodingErrorKind::LengthMismatch,
                        format!(
                            "code with scope declares {total} bytes, contains {}",
                            self.pos - start
                        ),
                    ));
                }
                Value::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope })
            }
            ElementType::Int32 => Value::Int32(self.i32()?),
            ElementType::Timestamp => {
                let increment = self.u32()?;
                let time = self.u32()?;
                Value::Timestamp(Timestamp { time, increment })
            }
            ElementType::Int64 => Value::Int64(self.i64()?),
            ElementType::Decimal128 => Value::Decimal128(Decimal128::from_bytes(self.array()?)),
            ElementType::MinKey => Value::MinKey,
            ElementType::MaxKey => Value::MaxKey,
        };
        Ok(value)
    }

    fn binary(&mut self) -> Result<Binary> {
        let len = self.i32()?;
        if len < 0 {
            return Err(err(
                EncodingErrorKind::InvalidValue,
                format!("negative binary length {len}"),
            ));
        }
        let subtype = self.u8()?;
        if subtype == Binary::BINARY_OLD {
            let inner = self.i32()?;
            if inner < 0 || inner.checked_add(4) != Some(len) {
                return Err(err(
                    EncodingErrorKind::LengthMismatch,
                    format!("old binary declares {len} bytes with inner length {inner}"),
                ));
            }
            let bytes = self.take(inner as usize)?.to_vec();
            return Ok(Binary { subtype, bytes });
        }
        let bytes = self.take(len as usize)?.to_vec();
        Ok(Binary { subtype, bytes })
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| err(EncodingErrorKind::InvalidUtf8, e.to_string()))
}
