// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Self-describing field-map codec + length-prefixed stream framing
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + property tests (decode is panic-free on arbitrary input)
//!
//! Body shape: `[N,V,ver, count:u16le, field...]`
//! Field shape: `[tag:u8, name_len:u8, name, value]`
//!   - number: `u64le`
//!   - string / binary: `[len:u32le, bytes]`
//!
//! Frame shape: `[body_len:u32le, body]`
//!
//! INVARIANTS:
//!   - A declared frame length above the caller's cap is rejected before any allocation
//!   - Field names are unique within one map
//!   - Never panics on malformed/truncated input

use std::collections::HashSet;
use std::io::{self, Read, Write};

/// Body magic (byte 0).
pub const MAGIC0: u8 = b'N';
/// Body magic (byte 1).
pub const MAGIC1: u8 = b'V';
/// Body format version.
pub const VERSION: u8 = 1;

/// Field tag: unsigned 64-bit number.
pub const TAG_NUMBER: u8 = 1;
/// Field tag: UTF-8 string.
pub const TAG_STRING: u8 = 2;
/// Field tag: opaque byte blob.
pub const TAG_BINARY: u8 = 3;

/// Size of the body header (`magic`, `version`, `count`).
pub const HEADER_LEN: usize = 5;
/// Size of the frame length prefix.
pub const PREFIX_LEN: usize = 4;
/// Longest accepted field name.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Errors produced by the codec and the framing helpers.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Input ended before the structure it announced.
    #[error("truncated message")]
    Truncated,
    /// Body magic bytes were incorrect.
    #[error("bad magic")]
    BadMagic,
    /// Unsupported body version.
    #[error("unsupported version {0}")]
    BadVersion(u8),
    /// Unknown field tag.
    #[error("unknown field tag {0}")]
    BadTag(u8),
    /// Field name empty, too long or not UTF-8.
    #[error("invalid field name")]
    BadName,
    /// String field carried invalid UTF-8.
    #[error("field {0:?} is not valid utf-8")]
    BadUtf8(String),
    /// The same field name appeared twice.
    #[error("duplicate field {0:?}")]
    Duplicate(String),
    /// Bytes remained after the last announced field.
    #[error("trailing bytes after last field")]
    Trailing,
    /// More fields than the header can announce.
    #[error("too many fields")]
    TooManyFields,
    /// Frame (or field) length exceeded the applicable cap.
    #[error("length {len} exceeds limit {max}")]
    TooLarge {
        /// Declared or actual length.
        len: usize,
        /// Cap that was exceeded.
        max: usize,
    },
    /// Underlying stream failure.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// A single typed field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Unsigned integer.
    Number(u64),
    /// UTF-8 string.
    String(String),
    /// Opaque bytes.
    Binary(Vec<u8>),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Self::Number(_) => TAG_NUMBER,
            Self::String(_) => TAG_STRING,
            Self::Binary(_) => TAG_BINARY,
        }
    }
}

/// Ordered map of uniquely-named typed fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: Vec<(String, Value)>,
}

impl FieldMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any previous field of that name.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Sets a string field.
    pub fn set_string(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, Value::String(value.into()));
    }

    /// Sets a number field.
    pub fn set_number(&mut self, name: &str, value: u64) {
        self.set(name, Value::Number(value));
    }

    /// Sets a binary field.
    pub fn set_binary(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.set(name, Value::Binary(value.into()));
    }

    /// Returns the field named `name`, whatever its type.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns `true` when a field named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the string field `name`; `None` if absent or of another type.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the number field `name`; `None` if absent or of another type.
    pub fn get_number(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the binary field `name`; `None` if absent or of another type.
    pub fn get_binary(&self, name: &str) -> Option<&[u8]> {
        match self.get(name) {
            Some(Value::Binary(b)) => Some(b),
            _ => None,
        }
    }

    /// Removes and returns the field named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` when the map holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Encodes `map` into a message body.
pub fn encode(map: &FieldMap) -> Result<Vec<u8>, WireError> {
    let count = u16::try_from(map.len()).map_err(|_| WireError::TooManyFields)?;
    let mut out = Vec::with_capacity(HEADER_LEN + encoded_fields_len(map));
    out.extend_from_slice(&[MAGIC0, MAGIC1, VERSION]);
    out.extend_from_slice(&count.to_le_bytes());
    for (name, value) in map.iter() {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(WireError::BadName);
        }
        out.push(value.tag());
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        match value {
            Value::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
            Value::String(s) => push_blob(&mut out, s.as_bytes())?,
            Value::Binary(b) => push_blob(&mut out, b)?,
        }
    }
    Ok(out)
}

fn encoded_fields_len(map: &FieldMap) -> usize {
    map.iter()
        .map(|(name, value)| {
            2 + name.len()
                + match value {
                    Value::Number(_) => 8,
                    Value::String(s) => 4 + s.len(),
                    Value::Binary(b) => 4 + b.len(),
                }
        })
        .sum()
}

fn push_blob(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| WireError::TooLarge { len: bytes.len(), max: u32::MAX as usize })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        let out = self.buf.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decodes a message body produced by [`encode`].
pub fn decode(body: &[u8]) -> Result<FieldMap, WireError> {
    let mut cur = Cursor { buf: body, pos: 0 };
    if cur.u8()? != MAGIC0 || cur.u8()? != MAGIC1 {
        return Err(WireError::BadMagic);
    }
    let version = cur.u8()?;
    if version != VERSION {
        return Err(WireError::BadVersion(version));
    }
    let count = cur.u16()? as usize;

    let mut seen = HashSet::with_capacity(count.min(64));
    let mut map = FieldMap::new();
    for _ in 0..count {
        let tag = cur.u8()?;
        let name_len = cur.u8()? as usize;
        if name_len == 0 {
            return Err(WireError::BadName);
        }
        let name = core::str::from_utf8(cur.take(name_len)?).map_err(|_| WireError::BadName)?;
        if !seen.insert(name) {
            return Err(WireError::Duplicate(name.to_string()));
        }
        let value = match tag {
            TAG_NUMBER => Value::Number(cur.u64()?),
            TAG_STRING => {
                let raw = cur.blob()?;
                let s = core::str::from_utf8(raw)
                    .map_err(|_| WireError::BadUtf8(name.to_string()))?;
                Value::String(s.to_string())
            }
            TAG_BINARY => Value::Binary(cur.blob()?.to_vec()),
            other => return Err(WireError::BadTag(other)),
        };
        map.fields.push((name.to_string(), value));
    }
    if cur.remaining() != 0 {
        return Err(WireError::Trailing);
    }
    Ok(map)
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write>(stream: &mut W, body: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(body.len())
        .map_err(|_| WireError::TooLarge { len: body.len(), max: u32::MAX as usize })?;
    let mut frame = Vec::with_capacity(PREFIX_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    stream.write_all(&frame)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame of at most `max_len` body bytes.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the next frame.
pub fn read_frame<R: Read>(stream: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, WireError> {
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;
    while filled < PREFIX_LEN {
        match stream.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(WireError::Truncated),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(WireError::TooLarge { len, max: max_len });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => WireError::Truncated,
        _ => WireError::Io(err),
    })?;
    Ok(Some(body))
}

/// Receives and decodes the next message; `Ok(None)` on clean peer close.
pub fn recv_map<R: Read>(stream: &mut R, max_len: usize) -> Result<Option<FieldMap>, WireError> {
    match read_frame(stream, max_len)? {
        Some(body) => decode(&body).map(Some),
        None => Ok(None),
    }
}

/// Encodes `map` and sends it as one frame.
pub fn send_map<W: Write>(stream: &mut W, map: &FieldMap) -> Result<(), WireError> {
    let body = encode(map)?;
    write_frame(stream, &body)
}
