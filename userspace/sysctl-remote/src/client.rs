// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous client for the remote sysctl protocol
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: `tests/sysctl_e2e` (real server over a Unix socket) + unit tests below
//!
//! PUBLIC API:
//!   - `SysctlClient::get_or_set_by_name` / `get_or_set_by_path`: one request, `(code, len)` back
//!   - `SysctlClient::get_by_path_shm`: result lands in a caller-owned `SharedRegion`
//!   - `read_by_name` / `read_by_path`: two-phase size discovery, then fetch
//!   - `write_by_name` / `write_by_path`: pure writes
//!
//! A transport failure drops the cached connection; the next call reconnects. Nothing is resent.

use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{DecodeError, NameRequest, PathRequest, Request, Response, ShmTarget};
use crate::shm::SharedRegion;
use crate::wire::{self, WireError};

/// Socket path the daemon binds when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sysctl.sock";
/// Largest inline response capacity the daemon accepts by default.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;
/// Largest response frame accepted by default (response limit plus envelope slack).
pub const DEFAULT_MAX_FRAME_LEN: usize = DEFAULT_MAX_RESPONSE_SIZE + 64 * 1024;
/// Two-phase reads retry discovery this many times when the value grows in between.
const READ_ATTEMPTS: usize = 3;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transport: {0}")]
    Wire(#[from] WireError),
    #[error("malformed response: {0}")]
    Decode(#[from] DecodeError),
    /// The server dropped the connection instead of answering.
    #[error("server closed the connection without a response")]
    Closed,
    /// Response carried more bytes than the caller's buffer holds.
    #[error("response of {got} bytes exceeds the {cap}-byte buffer")]
    Oversized { got: u64, cap: usize },
    /// Echoed payload and `payload_len` disagree.
    #[error("payload of {got} bytes but payload_len {declared}")]
    LengthMismatch { got: usize, declared: u64 },
    /// Server echoed bytes inline for a shared-memory request.
    #[error("inline payload on a shared-memory request")]
    UnexpectedPayload,
    /// Discovered value is larger than the server will return inline.
    #[error("value of {size} bytes exceeds the {limit}-byte response limit")]
    ValueTooLarge { size: u64, limit: usize },
    /// Requested capacity is larger than the shared-memory region.
    #[error("capacity {capacity} exceeds shared-memory region of {region} bytes")]
    RegionTooSmall { capacity: usize, region: usize },
    /// The configuration tree reported an errno-domain failure.
    #[error("remote sysctl failed: {}", io::Error::from_raw_os_error(*.0))]
    Remote(i32),
}

impl ClientError {
    /// Errno reported by the tree, if this is an application-level failure.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Remote(code) => Some(*code),
            _ => None,
        }
    }
}

/// Outcome of one call: the tree's result code and the byte count it reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: i32,
    pub len: u64,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Blocking client; one request is fully answered before the next is sent.
#[derive(Debug)]
pub struct SysctlClient {
    path: PathBuf,
    stream: Option<UnixStream>,
    timeout: Option<Duration>,
    max_frame_len: usize,
    max_response_size: usize,
}

impl SysctlClient {
    /// Creates a client that connects lazily on the first call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Creates a client and connects immediately.
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let mut client = Self::new(path);
        client.stream()?;
        Ok(client)
    }

    /// Applies a read/write timeout to the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.stream = None;
        self
    }

    /// Caps the size of response frames this client will accept.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Matches the daemon's inline response limit; larger values fail before they are fetched.
    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the current connection, if any.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    fn stream(&mut self) -> Result<&mut UnixStream, ClientError> {
        if self.stream.is_none() {
            let connect_err =
                |source| ClientError::Connect { path: self.path.clone(), source };
            let stream = UnixStream::connect(&self.path).map_err(connect_err)?;
            stream.set_read_timeout(self.timeout).map_err(connect_err)?;
            stream.set_write_timeout(self.timeout).map_err(connect_err)?;
            log::trace!("sysctl client: connected to {}", self.path.display());
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(ClientError::Closed)
    }

    /// Sends one request and waits for its response.
    pub fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        let result = self.exchange(request);
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, ClientError> {
        let max_frame_len = self.max_frame_len;
        let stream = self.stream()?;
        wire::send_map(stream, &request.to_fields())?;
        let map = wire::recv_map(stream, max_frame_len)?.ok_or(ClientError::Closed)?;
        Ok(Response::from_fields(map)?)
    }

    /// Reads and/or writes the node `name`.
    ///
    /// `out` is the destination (its length is the response capacity; `None` means size
    /// discovery or pure write). Returns the tree's code and reported length.
    pub fn get_or_set_by_name(
        &mut self,
        name: &str,
        out: Option<&mut [u8]>,
        input: Option<&[u8]>,
    ) -> Result<Reply, ClientError> {
        let capacity = out.as_ref().map_or(0, |buf| buf.len());
        let request = Request::ByName(NameRequest {
            name: name.to_string(),
            response_capacity: capacity as u64,
            write_payload: input.map(<[u8]>::to_vec),
        });
        let response = self.call(&request)?;
        deliver(response, out)
    }

    /// Reads and/or writes the node at numeric `path`.
    ///
    /// With neither `out` nor `input` this is a size-discovery call; with only `input` the
    /// response capacity is omitted (pure write).
    pub fn get_or_set_by_path(
        &mut self,
        path: &[i32],
        out: Option<&mut [u8]>,
        input: Option<&[u8]>,
    ) -> Result<Reply, ClientError> {
        let response_capacity = match (&out, input) {
            (Some(buf), _) => Some(buf.len() as u64),
            (None, Some(_)) => None,
            (None, None) => Some(0),
        };
        let request = Request::ByPath(PathRequest {
            path: path.to_vec(),
            response_capacity,
            write_payload: input.map(<[u8]>::to_vec),
            shm: None,
        });
        let response = self.call(&request)?;
        deliver(response, out)
    }

    /// Reads the node at `path` into `region` (first `capacity` bytes) instead of inline.
    ///
    /// On success the result occupies `region.as_slice()[..reply.len]`.
    pub fn get_by_path_shm(
        &mut self,
        path: &[i32],
        region: &SharedRegion,
        capacity: usize,
        input: Option<&[u8]>,
    ) -> Result<Reply, ClientError> {
        if capacity > region.len() {
            return Err(ClientError::RegionTooSmall { capacity, region: region.len() });
        }
        let request = Request::ByPath(PathRequest {
            path: path.to_vec(),
            response_capacity: Some(capacity as u64),
            write_payload: input.map(<[u8]>::to_vec),
            shm: Some(ShmTarget { path: region.name().to_string(), capacity: region.len() as u64 }),
        });
        let response = self.call(&request)?;
        if response.payload.is_some() {
            return Err(ClientError::UnexpectedPayload);
        }
        if response.payload_len > capacity as u64 {
            return Err(ClientError::Oversized { got: response.payload_len, cap: capacity });
        }
        Ok(Reply { code: response.result_code, len: response.payload_len })
    }

    /// Reads the whole value of `name` using size discovery followed by a sized fetch.
    pub fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>, ClientError> {
        self.read_two_phase(|client, out| client.get_or_set_by_name(name, out, None))
    }

    /// Reads the whole value at `path` using size discovery followed by a sized fetch.
    pub fn read_by_path(&mut self, path: &[i32]) -> Result<Vec<u8>, ClientError> {
        self.read_two_phase(|client, out| client.get_or_set_by_path(path, out, None))
    }

    /// Replaces the value of `name`.
    pub fn write_by_name(&mut self, name: &str, value: &[u8]) -> Result<(), ClientError> {
        check(self.get_or_set_by_name(name, None, Some(value))?)
    }

    /// Replaces the value at `path`.
    pub fn write_by_path(&mut self, path: &[i32], value: &[u8]) -> Result<(), ClientError> {
        check(self.get_or_set_by_path(path, None, Some(value))?)
    }

    fn read_two_phase<F>(&mut self, mut call: F) -> Result<Vec<u8>, ClientError>
    where
        F: FnMut(&mut Self, Option<&mut [u8]>) -> Result<Reply, ClientError>,
    {
        let mut last = Reply { code: 0, len: 0 };
        for _ in 0..READ_ATTEMPTS {
            let sized = check_reply(call(self, None)?)?;
            if sized.len == 0 {
                return Ok(Vec::new());
            }
            let size = fetch_size(sized.len, self.max_response_size)?;
            let mut buf = vec![0u8; size];
            last = call(self, Some(&mut buf))?;
            if last.code == libc::ENOMEM {
                log::debug!("sysctl client: value grew past {size} bytes, rediscovering");
                continue;
            }
            check_reply(last)?;
            buf.truncate(last.len as usize);
            return Ok(buf);
        }
        Err(ClientError::Remote(last.code))
    }
}

/// A capacity above the daemon's limit would be fatal on its side, so refuse it here.
fn fetch_size(len: u64, limit: usize) -> Result<usize, ClientError> {
    usize::try_from(len)
        .ok()
        .filter(|size| *size <= limit)
        .ok_or(ClientError::ValueTooLarge { size: len, limit })
}

fn check_reply(reply: Reply) -> Result<Reply, ClientError> {
    if reply.is_ok() {
        Ok(reply)
    } else {
        Err(ClientError::Remote(reply.code))
    }
}

fn check(reply: Reply) -> Result<(), ClientError> {
    check_reply(reply).map(|_| ())
}

fn deliver(response: Response, out: Option<&mut [u8]>) -> Result<Reply, ClientError> {
    let capacity = out.as_ref().map_or(0, |buf| buf.len());
    if let Some(payload) = response.payload.as_deref() {
        if payload.len() as u64 != response.payload_len {
            return Err(ClientError::LengthMismatch {
                got: payload.len(),
                declared: response.payload_len,
            });
        }
        match out {
            Some(buf) if payload.len() <= buf.len() => buf[..payload.len()].copy_from_slice(payload),
            _ => return Err(ClientError::Oversized { got: payload.len() as u64, cap: capacity }),
        }
    }
    Ok(Reply { code: response.result_code, len: response.payload_len })
}
