// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all)]

//! CONTEXT: sysctld – remote configuration-tree server for the embedded network stack
//!
//! OWNERS: @runtime
//!
//! STATUS: Experimental
//!
//! API_STABILITY: Unstable
//!
//! TEST_COVERAGE:
//!   - Unit tests per module (validator, dispatch, session, listener, tree, config)
//!   - Integration: `source/services/sysctld/tests/config_file.rs`
//!   - E2E: `tests/sysctl_e2e/tests/` (real socket, real shared memory)
//!
//! PUBLIC API:
//!   - `tree`: `ConfigTree` seam + `MemTree` reference tree
//!   - `validate` / `dispatch`: one request/response cycle, buffers scoped to the cycle
//!   - `session`: per-connection loop; `server`: listener + `ServerHandle`
//!   - `config`: `ServerConfig` (TOML + env)

pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod session;
pub mod shm_channel;
pub mod tree;
pub mod validate;

pub use config::{ConfigError, ServerConfig};
pub use error::Fatal;
pub use server::{Server, ServerError, ServerHandle};
pub use tree::{ConfigTree, MemTree, NodeValue, TreeReply};
