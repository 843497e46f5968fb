// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Configuration-tree seam consumed by the dispatch adapter + in-memory reference tree
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! The embedded stack owns the real tree; the daemon only needs the combined get/set primitive.
//! `old = None` is the size-discovery convention: the reply length is the full value size.
//!
//! INVARIANTS (MemTree):
//!   - With a destination buffer, the reported length never exceeds the buffer length
//!   - A read+write returns the previous value, then stores the new one
//!   - A write is only applied when the read half (if any) succeeded

use std::collections::HashMap;

use parking_lot::RwLock;

/// Result of one tree access: errno-domain code plus bytes read (or required).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeReply {
    pub code: i32,
    pub len: usize,
}

impl TreeReply {
    pub const fn ok(len: usize) -> Self {
        Self { code: 0, len }
    }

    pub const fn error(code: i32) -> Self {
        Self { code, len: 0 }
    }
}

/// Combined get/set primitive of the configuration tree.
///
/// Implementations must be safe to call concurrently from several sessions.
pub trait ConfigTree: Send + Sync {
    /// Accesses the node named `name`.
    fn get_or_set_by_name(&self, name: &str, old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply;

    /// Accesses the node at numeric `path`.
    fn get_or_set_by_path(&self, path: &[i32], old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply;
}

/// Typed node value held by [`MemTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeValue {
    /// 32-bit integer, little-endian on the wire.
    Int(i32),
    /// 64-bit integer, little-endian on the wire.
    Long(i64),
    /// UTF-8 string, exported with a trailing NUL.
    String(String),
    /// Raw bytes (statistics blocks, tables).
    Opaque(Vec<u8>),
}

impl NodeValue {
    /// Exported byte image.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(v) => v.to_le_bytes().to_vec(),
            Self::Long(v) => v.to_le_bytes().to_vec(),
            Self::String(s) => {
                let mut out = Vec::with_capacity(s.len() + 1);
                out.extend_from_slice(s.as_bytes());
                out.push(0);
                out
            }
            Self::Opaque(b) => b.clone(),
        }
    }

    /// Parses `bytes` as a replacement of the same kind; errno on mismatch.
    fn parse_like(&self, bytes: &[u8]) -> Result<Self, i32> {
        match self {
            Self::Int(_) => <[u8; 4]>::try_from(bytes)
                .map(|b| Self::Int(i32::from_le_bytes(b)))
                .map_err(|_| libc::EINVAL),
            Self::Long(_) => <[u8; 8]>::try_from(bytes)
                .map(|b| Self::Long(i64::from_le_bytes(b)))
                .map_err(|_| libc::EINVAL),
            Self::String(_) => {
                let raw = bytes.strip_suffix(&[0]).unwrap_or(bytes);
                core::str::from_utf8(raw)
                    .map(|s| Self::String(s.to_string()))
                    .map_err(|_| libc::EINVAL)
            }
            Self::Opaque(_) => Ok(Self::Opaque(bytes.to_vec())),
        }
    }
}

/// Errors when building a [`MemTree`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node name {0:?} already registered")]
    DuplicateName(String),
    #[error("node path {0:?} already registered")]
    DuplicatePath(Vec<i32>),
    #[error("node {0:?} needs a non-empty name and path")]
    Incomplete(String),
}

struct Node {
    value: NodeValue,
    writable: bool,
}

#[derive(Default)]
struct Nodes {
    slots: Vec<Node>,
    by_name: HashMap<String, usize>,
    by_path: HashMap<Vec<i32>, usize>,
}

enum Key<'a> {
    Name(&'a str),
    Path(&'a [i32]),
}

impl Nodes {
    fn index(&self, key: &Key<'_>) -> Option<usize> {
        match key {
            Key::Name(name) => self.by_name.get(*name).copied(),
            Key::Path(path) => self.by_path.get(*path).copied(),
        }
    }
}

/// Thread-safe in-memory configuration tree.
#[derive(Default)]
pub struct MemTree {
    nodes: RwLock<Nodes>,
}

impl MemTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node reachable by both `name` and `path`.
    pub fn insert(
        &self,
        name: &str,
        path: &[i32],
        value: NodeValue,
        writable: bool,
    ) -> Result<(), TreeError> {
        if name.is_empty() || path.is_empty() {
            return Err(TreeError::Incomplete(name.to_string()));
        }
        let mut nodes = self.nodes.write();
        if nodes.by_name.contains_key(name) {
            return Err(TreeError::DuplicateName(name.to_string()));
        }
        if nodes.by_path.contains_key(path) {
            return Err(TreeError::DuplicatePath(path.to_vec()));
        }
        let idx = nodes.slots.len();
        nodes.slots.push(Node { value, writable });
        nodes.by_name.insert(name.to_string(), idx);
        nodes.by_path.insert(path.to_vec(), idx);
        Ok(())
    }

    /// Current value of `name`, for inspection.
    pub fn value(&self, name: &str) -> Option<NodeValue> {
        let nodes = self.nodes.read();
        nodes.index(&Key::Name(name)).map(|idx| nodes.slots[idx].value.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn access(&self, key: Key<'_>, old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply {
        let Some(new) = new else {
            let nodes = self.nodes.read();
            return match nodes.index(&key) {
                Some(idx) => copy_out(&nodes.slots[idx].value, old),
                None => TreeReply::error(libc::ENOENT),
            };
        };

        let mut nodes = self.nodes.write();
        let Some(idx) = nodes.index(&key) else {
            return TreeReply::error(libc::ENOENT);
        };
        let node = &mut nodes.slots[idx];
        if !node.writable {
            return TreeReply::error(libc::EPERM);
        }
        let reply = copy_out(&node.value, old);
        if reply.code != 0 {
            return reply;
        }
        match node.value.parse_like(new) {
            Ok(value) => {
                node.value = value;
                reply
            }
            Err(code) => TreeReply { code, len: reply.len },
        }
    }
}

fn copy_out(value: &NodeValue, old: Option<&mut [u8]>) -> TreeReply {
    let bytes = value.to_bytes();
    let Some(buf) = old else {
        return TreeReply::ok(bytes.len());
    };
    let n = buf.len().min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    if n < bytes.len() {
        TreeReply { code: libc::ENOMEM, len: n }
    } else {
        TreeReply::ok(n)
    }
}

impl ConfigTree for MemTree {
    fn get_or_set_by_name(&self, name: &str, old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply {
        self.access(Key::Name(name), old, new)
    }

    fn get_or_set_by_path(&self, path: &[i32], old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply {
        self.access(Key::Path(path), old, new)
    }
}

/// Stack-statistics nodes served when the configuration lists none.
pub fn builtin_tree() -> MemTree {
    let tree = MemTree::new();
    let nodes: [(&str, &[i32], NodeValue, bool); 7] = [
        ("kern.ostype", &[1, 1], NodeValue::String("NexusStack".into()), false),
        ("kern.hostname", &[1, 10], NodeValue::String("localhost".into()), true),
        ("net.inet.ip.forwarding", &[4, 2, 0, 1], NodeValue::Int(0), true),
        ("net.inet.ip.ttl", &[4, 2, 0, 4], NodeValue::Int(64), true),
        ("net.inet.tcp.sendspace", &[4, 2, 6, 8], NodeValue::Int(32768), true),
        ("net.inet.tcp.recvspace", &[4, 2, 6, 9], NodeValue::Int(65536), true),
        ("net.inet.tcp.stats", &[4, 2, 6, 13], NodeValue::Opaque(vec![0; 256]), false),
    ];
    for (name, path, value, writable) in nodes {
        if let Err(err) = tree.insert(name, path, value, writable) {
            log::warn!("sysctld: builtin node skipped: {err}");
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> MemTree {
        let tree = MemTree::new();
        tree.insert("kern.ostype", &[1, 1], NodeValue::String("nexus".into()), false).unwrap();
        tree.insert("net.inet.ip.ttl", &[4, 2, 0, 4], NodeValue::Int(64), true).unwrap();
        tree
    }

    #[test]
    fn discovery_reports_full_size() {
        let reply = tree().get_or_set_by_name("kern.ostype", None, None);
        assert_eq!(reply, TreeReply::ok(6));
    }

    #[test]
    fn exact_buffer_reads_whole_value() {
        let mut buf = [0u8; 6];
        let reply = tree().get_or_set_by_name("kern.ostype", Some(&mut buf[..]), None);
        assert_eq!(reply, TreeReply::ok(6));
        assert_eq!(&buf, b"nexus\0");
    }

    #[test]
    fn short_buffer_reports_enomem_with_prefix() {
        let mut buf = [0u8; 3];
        let reply = tree().get_or_set_by_name("kern.ostype", Some(&mut buf[..]), None);
        assert_eq!(reply, TreeReply { code: libc::ENOMEM, len: 3 });
        assert_eq!(&buf, b"nex");
    }

    #[test]
    fn unknown_node_is_enoent() {
        assert_eq!(tree().get_or_set_by_path(&[9, 9], None, None), TreeReply::error(libc::ENOENT));
    }

    #[test]
    fn read_write_returns_old_value_then_applies() {
        let tree = tree();
        let mut old = [0u8; 4];
        let reply = tree.get_or_set_by_path(&[4, 2, 0, 4], Some(&mut old[..]), Some(&128i32.to_le_bytes()[..]));
        assert_eq!(reply, TreeReply::ok(4));
        assert_eq!(i32::from_le_bytes(old), 64);
        assert_eq!(tree.value("net.inet.ip.ttl"), Some(NodeValue::Int(128)));
    }

    #[test]
    fn write_checks_permissions_and_width() {
        let tree = tree();
        assert_eq!(
            tree.get_or_set_by_name("kern.ostype", None, Some(&b"other"[..])).code,
            libc::EPERM
        );
        assert_eq!(tree.get_or_set_by_name("net.inet.ip.ttl", None, Some(&[1u8, 2][..])).code, libc::EINVAL);
        assert_eq!(tree.value("net.inet.ip.ttl"), Some(NodeValue::Int(64)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let tree = tree();
        assert_eq!(
            tree.insert("kern.ostype", &[7], NodeValue::Int(0), false),
            Err(TreeError::DuplicateName("kern.ostype".into()))
        );
        assert_eq!(
            tree.insert("other", &[1, 1], NodeValue::Int(0), false),
            Err(TreeError::DuplicatePath(vec![1, 1]))
        );
    }

    #[test]
    fn builtin_tree_is_populated() {
        let tree = builtin_tree();
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.get_or_set_by_name("net.inet.tcp.stats", None, None), TreeReply::ok(256));
    }
}
