// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connection-fatal faults. None of these produce a response; the session closes instead.

use sysctl_remote::{DecodeError, ShmError, WireError};

#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    /// Framing or codec failure while reading a request.
    #[error("receive: {0}")]
    Receive(#[source] WireError),
    /// Field map does not describe a valid request.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    /// Inline read buffer would exceed the server's response limit.
    #[error("response capacity {requested} exceeds limit {max}")]
    CapacityTooLarge { requested: u64, max: usize },
    /// Response capacity does not fit the declared shared-memory object.
    #[error("response capacity {requested} exceeds shared-memory capacity {capacity}")]
    CapacityExceedsShm { requested: u64, capacity: u64 },
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),
    /// Tree primitive reported more bytes than the destination holds.
    #[error("tree reported {produced} bytes for a {capacity}-byte buffer")]
    Overflow { produced: usize, capacity: usize },
    /// Framing or I/O failure while writing the response.
    #[error("send: {0}")]
    Send(#[source] WireError),
}
