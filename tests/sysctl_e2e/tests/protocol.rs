// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: End-to-end protocol tests against a live sysctld listener
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 16 tests (discovery, fatal closes, overflow guard, writes, shm, sequencing)

use std::sync::Arc;

use sysctl_e2e::{send_and_drain, TestServer, IO_TIMEOUT};
use sysctl_remote::protocol::{
    FIELD_PATH, FIELD_RESPONSE_CAPACITY, FIELD_TYPE, TYPE_BY_NAME, TYPE_BY_PATH,
};
use sysctl_remote::{wire, ClientError, FieldMap, NameRequest, PathRequest, Request, Response};
use sysctl_remote::{SharedRegion, ShmTarget, SysctlClient};
use sysctld::{ConfigTree, MemTree, NodeValue, TreeReply};

const MIB: u64 = 1024 * 1024;

/// Tree double that reports a fixed reply whatever it is given.
struct FixedReply(TreeReply);

impl ConfigTree for FixedReply {
    fn get_or_set_by_name(&self, _: &str, _: Option<&mut [u8]>, _: Option<&[u8]>) -> TreeReply {
        self.0
    }

    fn get_or_set_by_path(&self, _: &[i32], _: Option<&mut [u8]>, _: Option<&[u8]>) -> TreeReply {
        self.0
    }
}

fn by_name(name: &str, capacity: u64) -> Request {
    Request::ByName(NameRequest { name: name.into(), response_capacity: capacity, write_payload: None })
}

fn roundtrip(stream: &mut std::os::unix::net::UnixStream, request: &Request) -> Response {
    wire::send_map(stream, &request.to_fields()).unwrap();
    let map = wire::recv_map(stream, 2 * MIB as usize).unwrap().expect("response");
    Response::from_fields(map).unwrap()
}

#[test]
fn size_discovery_then_exact_fetch() {
    let server = TestServer::start();
    let mut stream = server.connect_raw();

    let sized = roundtrip(&mut stream, &by_name("kern.ostype", 0));
    assert_eq!(sized, Response { result_code: 0, payload: None, payload_len: 11 });

    let fetched = roundtrip(&mut stream, &by_name("kern.ostype", sized.payload_len));
    assert_eq!(fetched.result_code, 0);
    assert_eq!(fetched.payload_len, 11);
    assert_eq!(fetched.payload.as_deref(), Some(&b"NexusStack\0"[..]));
}

#[test]
fn client_two_phase_read_by_name_and_path() {
    let server = TestServer::start();
    let mut client = server.client();
    assert_eq!(client.read_by_name("kern.ostype").unwrap(), b"NexusStack\0");
    assert_eq!(client.read_by_path(&[4, 2, 0, 4]).unwrap(), 64i32.to_le_bytes());
    assert_eq!(client.read_by_path(&[4, 2, 6, 13]).unwrap().len(), 256);
}

#[test]
fn capacity_over_limit_closes_without_bytes() {
    let server = TestServer::start();
    let mut stream = server.connect_raw();
    let rest = send_and_drain(&mut stream, &by_name("kern.ostype", MIB + 1).to_fields());
    assert!(rest.is_empty());
}

#[test]
fn partial_path_element_closes_without_bytes() {
    let server = TestServer::start();
    let mut stream = server.connect_raw();
    let mut map = FieldMap::new();
    map.set_string(FIELD_TYPE, TYPE_BY_PATH);
    map.set_binary(FIELD_PATH, vec![1, 0, 0, 0, 1]);
    map.set_number(FIELD_RESPONSE_CAPACITY, 16);
    assert!(send_and_drain(&mut stream, &map).is_empty());
}

#[test]
fn unknown_kind_and_missing_field_close_without_bytes() {
    let server = TestServer::start();

    let mut stream = server.connect_raw();
    let mut map = FieldMap::new();
    map.set_string(FIELD_TYPE, "list_all");
    assert!(send_and_drain(&mut stream, &map).is_empty());

    let mut stream = server.connect_raw();
    let mut map = FieldMap::new();
    map.set_string(FIELD_TYPE, TYPE_BY_NAME);
    map.set_number(FIELD_RESPONSE_CAPACITY, 8);
    assert!(send_and_drain(&mut stream, &map).is_empty());
}

#[test]
fn overflowing_tree_reply_closes_regardless_of_code() {
    for code in [0, libc::EIO] {
        let server = TestServer::with_tree(Arc::new(FixedReply(TreeReply { code, len: 33 })));
        let mut stream = server.connect_raw();
        assert!(send_and_drain(&mut stream, &by_name("any", 32).to_fields()).is_empty());
    }
}

#[test]
fn exact_fit_tree_reply_is_answered() {
    let server = TestServer::with_tree(Arc::new(FixedReply(TreeReply { code: 0, len: 32 })));
    let mut stream = server.connect_raw();
    let resp = roundtrip(&mut stream, &by_name("any", 32));
    assert_eq!(resp.payload.map(|p| p.len()), Some(32));
}

#[test]
fn write_only_request_never_echoes() {
    let tree = Arc::new(sysctl_e2e::sample_tree());
    let server = TestServer::with_tree(tree.clone());
    let mut stream = server.connect_raw();
    let request = Request::ByPath(PathRequest {
        path: vec![4, 2, 0, 4],
        response_capacity: None,
        write_payload: Some(128i32.to_le_bytes().to_vec()),
        shm: None,
    });
    let resp = roundtrip(&mut stream, &request);
    assert_eq!(resp.result_code, 0);
    assert_eq!(resp.payload, None);
    assert_eq!(tree.value("net.inet.ip.ttl"), Some(NodeValue::Int(128)));

    let mut client = server.client();
    client.write_by_name("kern.hostname", b"edge-01").unwrap();
    assert_eq!(client.read_by_name("kern.hostname").unwrap(), b"edge-01\0");
}

#[test]
fn application_errors_keep_the_connection_open() {
    let server = TestServer::start();
    let mut stream = server.connect_raw();
    let missing = roundtrip(&mut stream, &by_name("no.such.node", 16));
    assert_eq!(missing, Response { result_code: libc::ENOENT, payload: None, payload_len: 0 });

    let denied = roundtrip(
        &mut stream,
        &Request::ByName(NameRequest {
            name: "kern.ostype".into(),
            response_capacity: 0,
            write_payload: Some(b"other".to_vec()),
        }),
    );
    assert_eq!(denied.result_code, libc::EPERM);

    let ok = roundtrip(&mut stream, &by_name("kern.ostype", 64));
    assert_eq!(ok.payload_len, 11);

    let mut client = server.client();
    let err = client.read_by_name("no.such.node").unwrap_err();
    assert_eq!(err.errno(), Some(libc::ENOENT));
}

#[test]
fn shared_memory_matches_inline_result() {
    let server = TestServer::start();
    let mut client = server.client();
    let path = [4, 2, 6, 13];
    let inline = client.read_by_path(&path).unwrap();

    let name = format!("/sysctl-e2e-{}", std::process::id());
    let region = SharedRegion::create(&name, 4096).unwrap();
    let reply = client.get_by_path_shm(&path, &region, 4096, None).unwrap();
    assert!(reply.is_ok());
    assert_eq!(&region.as_slice()[..reply.len as usize], inline.as_slice());
    drop(region);
    SharedRegion::unlink(&name).unwrap();
}

#[test]
fn missing_shared_memory_object_closes_the_connection() {
    let server = TestServer::start();
    let mut client = server.client();
    let name = format!("/sysctl-e2e-gone-{}", std::process::id());
    let region = SharedRegion::create(&name, 64).unwrap();
    SharedRegion::unlink(&name).unwrap();
    let err = client.get_by_path_shm(&[1, 1], &region, 64, None).unwrap_err();
    assert!(matches!(err, ClientError::Closed | ClientError::Wire(_)));
    assert!(!client.is_connected());
    // Next call reconnects.
    assert_eq!(client.read_by_name("kern.ostype").unwrap(), b"NexusStack\0");
}

#[test]
fn missing_shared_memory_object_is_fatal_even_for_discovery() {
    let server = TestServer::start();
    let target = ShmTarget { path: format!("/sysctl-e2e-absent-{}", std::process::id()), capacity: 64 };
    for response_capacity in [Some(0), None] {
        let mut stream = server.connect_raw();
        let request = Request::ByPath(PathRequest {
            path: vec![1, 10],
            response_capacity,
            write_payload: response_capacity.is_none().then(|| b"edge-02".to_vec()),
            shm: Some(target.clone()),
        });
        assert!(send_and_drain(&mut stream, &request.to_fields()).is_empty());
    }
    let mut client = server.client();
    assert_eq!(client.read_by_name("kern.hostname").unwrap(), b"localhost\0");
}

#[test]
fn sequential_requests_and_reconnect() {
    let server = TestServer::start();
    let mut stream = server.connect_raw();
    let first = roundtrip(&mut stream, &by_name("kern.ostype", 0));
    let second = roundtrip(&mut stream, &by_name("kern.hostname", 0));
    assert_eq!((first.payload_len, second.payload_len), (11, 10));
    drop(stream);

    let mut client = SysctlClient::connect(server.path()).unwrap().with_timeout(IO_TIMEOUT);
    assert_eq!(client.read_by_path(&[1, 10]).unwrap(), b"localhost\0");
}

#[test]
fn value_above_response_limit_fails_before_fetch() {
    let server = TestServer::with_config(Arc::new(sysctl_e2e::sample_tree()), |config| {
        config.max_response_size = 64
    });
    let mut client = server.client().with_max_response_size(64);
    let err = client.read_by_path(&[4, 2, 6, 13]).unwrap_err();
    assert!(matches!(err, ClientError::ValueTooLarge { size: 256, limit: 64 }));
    assert!(client.is_connected());
    assert_eq!(client.read_by_name("kern.ostype").unwrap(), b"NexusStack\0");
}

#[test]
fn configured_limit_applies_and_shutdown_removes_socket() {
    let server = TestServer::with_config(Arc::new(MemTree::new()), |config| config.max_response_size = 64);
    let mut stream = server.connect_raw();
    assert!(send_and_drain(&mut stream, &by_name("x", 65).to_fields()).is_empty());
    let path = server.path().to_path_buf();
    server.shutdown();
    assert!(!path.exists());
}
