// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Remote sysctl message catalog (by-name / by-path requests, responses)
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + `tests/catalog.rs`
//!
//! Requests and responses travel as [`FieldMap`]s. A message missing a structurally required
//! field, carrying a field of the wrong type, or naming an unknown `type` is a [`DecodeError`];
//! the server treats every decode error as fatal to the connection.
//!
//! INVARIANTS:
//!   - Path blobs hold whole little-endian `i32` elements; 1..=`MAX_PATH_DEPTH` of them
//!   - `shm_path` and `shm_capacity` are supplied together or not at all
//!   - `result_code` is the two's-complement `u32` image of the errno-domain `i32`

use crate::wire::FieldMap;

/// `type` value of a by-name request.
pub const TYPE_BY_NAME: &str = "by_name";
/// `type` value of a by-path request.
pub const TYPE_BY_PATH: &str = "by_path";

pub const FIELD_TYPE: &str = "type";
pub const FIELD_NAME: &str = "name";
pub const FIELD_PATH: &str = "path";
pub const FIELD_RESPONSE_CAPACITY: &str = "response_capacity";
pub const FIELD_WRITE_PAYLOAD: &str = "write_payload";
pub const FIELD_SHM_PATH: &str = "shm_path";
pub const FIELD_SHM_CAPACITY: &str = "shm_capacity";
pub const FIELD_RESULT_CODE: &str = "result_code";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_PAYLOAD_LEN: &str = "payload_len";

/// Bytes per encoded path element.
pub const PATH_ELEMENT_LEN: usize = 4;
/// Deepest numeric path the configuration tree can address.
pub const MAX_PATH_DEPTH: usize = 24;

/// Errors when turning a field map into a request or response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A structurally required field is absent.
    #[error("missing field {0:?}")]
    Missing(&'static str),
    /// A known field carried the wrong value type.
    #[error("field {0:?} has the wrong type")]
    WrongType(&'static str),
    /// `type` named a request kind this catalog does not define.
    #[error("unknown request type {0:?}")]
    UnknownType(String),
    /// Path blob length is not a multiple of [`PATH_ELEMENT_LEN`].
    #[error("path blob of {0} bytes is not a whole number of elements")]
    PartialPathElement(usize),
    /// Path blob holds no elements.
    #[error("path is empty")]
    EmptyPath,
    /// Path deeper than [`MAX_PATH_DEPTH`].
    #[error("path depth {0} exceeds {MAX_PATH_DEPTH}")]
    PathTooDeep(usize),
    /// Only one of `shm_path` / `shm_capacity` was supplied.
    #[error("shm_path and shm_capacity must be supplied together")]
    IncompleteShm,
    /// `result_code` does not fit the errno domain.
    #[error("result code {0} out of range")]
    BadResultCode(u64),
}

/// Shared-memory object the server writes results into instead of echoing them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmTarget {
    /// POSIX shared-memory object name (`/name`).
    pub path: String,
    /// Declared size of the object; the server maps exactly this many bytes.
    pub capacity: u64,
}

/// Request addressing a node by its dotted name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameRequest {
    pub name: String,
    /// Largest number of bytes the caller accepts; `0` means size discovery or pure write.
    pub response_capacity: u64,
    pub write_payload: Option<Vec<u8>>,
}

/// Request addressing a node by its numeric path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRequest {
    pub path: Vec<i32>,
    /// `None` on the wire means a pure write.
    pub response_capacity: Option<u64>,
    pub write_payload: Option<Vec<u8>>,
    pub shm: Option<ShmTarget>,
}

/// A decoded request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    ByName(NameRequest),
    ByPath(PathRequest),
}

/// Outcome of one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Errno-domain result of the tree primitive (`0` on success).
    pub result_code: i32,
    /// Inline result bytes; `None` for shared-memory delivery, errors and empty results.
    pub payload: Option<Vec<u8>>,
    /// Bytes the tree primitive reported, whether or not they are echoed.
    pub payload_len: u64,
}

impl Request {
    /// Wire `type` of this request.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ByName(_) => TYPE_BY_NAME,
            Self::ByPath(_) => TYPE_BY_PATH,
        }
    }

    /// Builds the field map sent on the wire.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.set_string(FIELD_TYPE, self.kind());
        match self {
            Self::ByName(req) => {
                map.set_string(FIELD_NAME, req.name.as_str());
                map.set_number(FIELD_RESPONSE_CAPACITY, req.response_capacity);
                if let Some(payload) = &req.write_payload {
                    map.set_binary(FIELD_WRITE_PAYLOAD, payload.as_slice());
                }
            }
            Self::ByPath(req) => {
                map.set_binary(FIELD_PATH, encode_path(&req.path));
                if let Some(capacity) = req.response_capacity {
                    map.set_number(FIELD_RESPONSE_CAPACITY, capacity);
                }
                if let Some(shm) = &req.shm {
                    map.set_string(FIELD_SHM_PATH, shm.path.as_str());
                    map.set_number(FIELD_SHM_CAPACITY, shm.capacity);
                }
                if let Some(payload) = &req.write_payload {
                    map.set_binary(FIELD_WRITE_PAYLOAD, payload.as_slice());
                }
            }
        }
        map
    }

    /// Decodes a request, taking ownership of the map so blobs move instead of copying.
    pub fn from_fields(mut map: FieldMap) -> Result<Self, DecodeError> {
        let kind = required_string(&mut map, FIELD_TYPE)?;
        match kind.as_str() {
            TYPE_BY_NAME => {
                let name = required_string(&mut map, FIELD_NAME)?;
                let response_capacity = optional_number(&mut map, FIELD_RESPONSE_CAPACITY)?
                    .ok_or(DecodeError::Missing(FIELD_RESPONSE_CAPACITY))?;
                let write_payload = optional_binary(&mut map, FIELD_WRITE_PAYLOAD)?;
                Ok(Self::ByName(NameRequest { name, response_capacity, write_payload }))
            }
            TYPE_BY_PATH => {
                let blob = optional_binary(&mut map, FIELD_PATH)?
                    .ok_or(DecodeError::Missing(FIELD_PATH))?;
                let path = decode_path(&blob)?;
                let response_capacity = optional_number(&mut map, FIELD_RESPONSE_CAPACITY)?;
                let shm_path = optional_string(&mut map, FIELD_SHM_PATH)?;
                let shm_capacity = optional_number(&mut map, FIELD_SHM_CAPACITY)?;
                let shm = match (shm_path, shm_capacity) {
                    (Some(path), Some(capacity)) => Some(ShmTarget { path, capacity }),
                    (None, None) => None,
                    _ => return Err(DecodeError::IncompleteShm),
                };
                let write_payload = optional_binary(&mut map, FIELD_WRITE_PAYLOAD)?;
                Ok(Self::ByPath(PathRequest { path, response_capacity, write_payload, shm }))
            }
            _ => Err(DecodeError::UnknownType(kind)),
        }
    }
}

impl Response {
    /// Envelope with no inline bytes: errors, discovery, writes and shared-memory delivery.
    pub fn without_payload(result_code: i32, payload_len: u64) -> Self {
        Self { result_code, payload: None, payload_len }
    }

    /// Builds the field map sent on the wire.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.set_number(FIELD_RESULT_CODE, u64::from(self.result_code as u32));
        if let Some(payload) = &self.payload {
            map.set_binary(FIELD_PAYLOAD, payload.as_slice());
        }
        map.set_number(FIELD_PAYLOAD_LEN, self.payload_len);
        map
    }

    /// Decodes a response.
    pub fn from_fields(mut map: FieldMap) -> Result<Self, DecodeError> {
        let raw = optional_number(&mut map, FIELD_RESULT_CODE)?
            .ok_or(DecodeError::Missing(FIELD_RESULT_CODE))?;
        let result_code = u32::try_from(raw).map_err(|_| DecodeError::BadResultCode(raw))? as i32;
        let payload = optional_binary(&mut map, FIELD_PAYLOAD)?;
        let payload_len = optional_number(&mut map, FIELD_PAYLOAD_LEN)?
            .ok_or(DecodeError::Missing(FIELD_PAYLOAD_LEN))?;
        Ok(Self { result_code, payload, payload_len })
    }
}

/// Encodes a numeric path as consecutive little-endian `i32`s.
pub fn encode_path(path: &[i32]) -> Vec<u8> {
    path.iter().flat_map(|element| element.to_le_bytes()).collect()
}

/// Decodes a path blob; rejects partial elements, empty paths and over-deep paths.
pub fn decode_path(blob: &[u8]) -> Result<Vec<i32>, DecodeError> {
    if blob.len() % PATH_ELEMENT_LEN != 0 {
        return Err(DecodeError::PartialPathElement(blob.len()));
    }
    let depth = blob.len() / PATH_ELEMENT_LEN;
    if depth == 0 {
        return Err(DecodeError::EmptyPath);
    }
    if depth > MAX_PATH_DEPTH {
        return Err(DecodeError::PathTooDeep(depth));
    }
    Ok(blob
        .chunks_exact(PATH_ELEMENT_LEN)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn required_string(map: &mut FieldMap, name: &'static str) -> Result<String, DecodeError> {
    optional_string(map, name)?.ok_or(DecodeError::Missing(name))
}

fn optional_string(map: &mut FieldMap, name: &'static str) -> Result<Option<String>, DecodeError> {
    use crate::wire::Value;
    match map.remove(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DecodeError::WrongType(name)),
    }
}

fn optional_number(map: &mut FieldMap, name: &'static str) -> Result<Option<u64>, DecodeError> {
    use crate::wire::Value;
    match map.remove(name) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n)),
        Some(_) => Err(DecodeError::WrongType(name)),
    }
}

fn optional_binary(map: &mut FieldMap, name: &'static str) -> Result<Option<Vec<u8>>, DecodeError> {
    use crate::wire::Value;
    match map.remove(name) {
        None => Ok(None),
        Some(Value::Binary(b)) => Ok(Some(b)),
        Some(_) => Err(DecodeError::WrongType(name)),
    }
}
