// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host tests for loading the daemon configuration from disk
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 integration tests

use std::fs;

use sysctld::config::{ConfigError, NodeKind};
use sysctld::{NodeValue, ServerConfig};

#[test]
fn file_settings_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sysctld.toml");
    fs::write(
        &path,
        r#"
        socket_path = "/run/nexus/sysctl.sock"
        max_response_size = 4096
        socket_mode = 0o660

        [[nodes]]
        name = "net.inet.tcp.mssdflt"
        path = [4, 2, 6, 3]
        kind = "int"
        value = 536
        writable = true
        "#,
    )
    .unwrap();

    let config = ServerConfig::from_file(&path).unwrap();
    assert_eq!(config.max_response_size, 4096);
    assert_eq!(config.frame_limit(), 4096 + 64 * 1024);
    assert_eq!(config.socket_mode, 0o660);
    assert_eq!(config.nodes[0].kind, NodeKind::Int);
    config.validate().unwrap();

    let tree = config.build_tree().unwrap();
    assert_eq!(tree.value("net.inet.tcp.mssdflt"), Some(NodeValue::Int(536)));
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    match ServerConfig::from_file(&path) {
        Err(ConfigError::Read { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "max_response_size = \"big\"").unwrap();
    match ServerConfig::from_file(&path) {
        Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("unexpected: {other:?}"),
    }
}
