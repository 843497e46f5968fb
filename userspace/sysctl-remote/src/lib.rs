// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Remote configuration-tree (sysctl) access protocol, client side + shared pieces
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, `tests/catalog.rs`, end-to-end in `tests/sysctl_e2e`
//!
//! PUBLIC API:
//!   - `wire`: field-map codec + length-prefixed framing
//!   - `protocol`: request/response catalog (`Request`, `Response`, `ShmTarget`)
//!   - `shm`: POSIX shared-memory region (`SharedRegion`)
//!   - `client`: synchronous `SysctlClient`
//!
//! The embedded network stack keeps its configuration tree in-process; external tools reach it
//! through a local stream socket speaking this protocol.

#![deny(unsafe_code)]
#![deny(clippy::all)]

pub mod client;
pub mod protocol;
#[allow(unsafe_code)]
pub mod shm;
pub mod wire;

pub use client::{
    ClientError, Reply, SysctlClient, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_SOCKET_PATH,
};
pub use protocol::{DecodeError, NameRequest, PathRequest, Request, Response, ShmTarget};
pub use shm::{SharedRegion, ShmError};
pub use wire::{FieldMap, Value, WireError};
