//! CONTEXT: sysctl end-to-end test harness library
//! INTENT: Run a real sysctld listener on a private socket and talk to it over the wire
//! DEPS: sysctld (server), sysctl-remote (client, codec)
//! TESTS: Size discovery, fatal closes, overflow guard, write-only, shared memory, sequencing
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sysctl_remote::{wire, FieldMap, SysctlClient};
use sysctld::{ConfigTree, MemTree, NodeValue, Server, ServerConfig, ServerHandle};
use tempfile::TempDir;

/// Upper bound for any single blocking read in the tests.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener on a socket inside a private temporary directory.
pub struct TestServer {
    handle: Option<ServerHandle>,
    _dir: TempDir,
}

impl TestServer {
    /// Server over [`sample_tree`] with default limits.
    pub fn start() -> Self {
        Self::with_tree(Arc::new(sample_tree()))
    }

    pub fn with_tree(tree: Arc<dyn ConfigTree>) -> Self {
        Self::with_config(tree, |_| {})
    }

    /// Server whose configuration is adjusted by `tweak` before binding.
    pub fn with_config(tree: Arc<dyn ConfigTree>, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServerConfig { socket_path: dir.path().join("sysctl.sock"), ..ServerConfig::default() };
        tweak(&mut config);
        let handle = Server::bind(&config, tree).expect("bind").spawn().expect("spawn");
        Self { handle: Some(handle), _dir: dir }
    }

    pub fn path(&self) -> &Path {
        self.handle.as_ref().map(ServerHandle::path).expect("running server")
    }

    pub fn client(&self) -> SysctlClient {
        SysctlClient::new(self.path()).with_timeout(IO_TIMEOUT)
    }

    /// Raw connection for hand-built frames.
    pub fn connect_raw(&self) -> UnixStream {
        let stream = UnixStream::connect(self.path()).expect("connect");
        stream.set_read_timeout(Some(IO_TIMEOUT)).expect("timeout");
        stream
    }

    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().expect("shutdown");
        }
    }
}

/// Nodes used across the end-to-end tests.
pub fn sample_tree() -> MemTree {
    let tree = MemTree::new();
    let nodes: [(&str, &[i32], NodeValue, bool); 4] = [
        ("kern.ostype", &[1, 1], NodeValue::String("NexusStack".into()), false),
        ("kern.hostname", &[1, 10], NodeValue::String("localhost".into()), true),
        ("net.inet.ip.ttl", &[4, 2, 0, 4], NodeValue::Int(64), true),
        ("net.inet.tcp.stats", &[4, 2, 6, 13], NodeValue::Opaque((0..=255).collect()), false),
    ];
    for (name, path, value, writable) in nodes {
        tree.insert(name, path, value, writable).expect("insert");
    }
    tree
}

/// Sends `map` and returns every byte the server wrote before closing.
///
/// Only meaningful for requests the server must reject: a healthy session keeps the connection
/// open and this call would block until [`IO_TIMEOUT`].
pub fn send_and_drain(stream: &mut UnixStream, map: &FieldMap) -> Vec<u8> {
    wire::send_map(stream, map).expect("send");
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).expect("server closed the connection");
    rest
}
