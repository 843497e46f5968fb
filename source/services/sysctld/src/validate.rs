// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Request validator and per-cycle buffer manager
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below
//!
//! Turns a decoded request into bounded buffers for exactly one cycle.
//!
//! RULES (in order):
//!   1. Inline capacity must not exceed `Limits::max_response_size`
//!   2. With a shared-memory target, capacity must not exceed the declared object capacity
//!   3. Path shape is enforced when the request is decoded
//!   4. A local read buffer exists only for a non-zero capacity; zero means "omitted" (size discovery)
//!   5. A shared-memory target is always carried to dispatch, even with zero capacity, so it is mapped
//!   6. The write payload is borrowed from the request, never copied

use sysctl_remote::{Request, ShmTarget};

use crate::error::Fatal;

/// Server-side bounds applied to every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_response_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_response_size: crate::config::DEFAULT_MAX_RESPONSE_SIZE }
    }
}

/// Where the tree primitive writes the value it reads.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadTarget<'a> {
    /// No destination: size discovery or pure write.
    Omitted,
    /// Zeroed local buffer of exactly the requested capacity.
    Local(Vec<u8>),
    /// First `len` bytes of the client's shared-memory object; `len == 0` maps it but passes no buffer.
    Shared { target: &'a ShmTarget, len: usize },
}

impl ReadTarget<'_> {
    /// Capacity of the destination in bytes; `None` when omitted.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Self::Omitted => None,
            Self::Local(buf) => Some(buf.len()),
            Self::Shared { len, .. } => Some(*len),
        }
    }
}

/// Buffers owned by one request/response cycle.
#[derive(Debug, PartialEq, Eq)]
pub struct Buffers<'a> {
    pub read: ReadTarget<'a>,
    pub write: Option<&'a [u8]>,
}

/// Validates `request` against `limits` and prepares its buffers.
pub fn validate<'a>(request: &'a Request, limits: &Limits) -> Result<Buffers<'a>, Fatal> {
    let (capacity, shm, write) = match request {
        Request::ByName(req) => (Some(req.response_capacity), None, req.write_payload.as_deref()),
        Request::ByPath(req) => (req.response_capacity, req.shm.as_ref(), req.write_payload.as_deref()),
    };
    let capacity = capacity.unwrap_or(0);

    let read = match shm {
        Some(target) => {
            if capacity > target.capacity {
                return Err(Fatal::CapacityExceedsShm { requested: capacity, capacity: target.capacity });
            }
            let len = usize::try_from(capacity).map_err(|_| Fatal::CapacityExceedsShm {
                requested: capacity,
                capacity: target.capacity,
            })?;
            ReadTarget::Shared { target, len }
        }
        None => {
            let len = usize::try_from(capacity)
                .ok()
                .filter(|len| *len <= limits.max_response_size)
                .ok_or(Fatal::CapacityTooLarge { requested: capacity, max: limits.max_response_size })?;
            if len == 0 {
                ReadTarget::Omitted
            } else {
                ReadTarget::Local(vec![0u8; len])
            }
        }
    };
    Ok(Buffers { read, write })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysctl_remote::{NameRequest, PathRequest};

    const LIMITS: Limits = Limits { max_response_size: 1024 * 1024 };

    fn by_name(capacity: u64, write: Option<&[u8]>) -> Request {
        Request::ByName(NameRequest {
            name: "kern.ostype".into(),
            response_capacity: capacity,
            write_payload: write.map(<[u8]>::to_vec),
        })
    }

    fn by_path(capacity: Option<u64>, shm: Option<u64>, write: Option<&[u8]>) -> Request {
        Request::ByPath(PathRequest {
            path: vec![1, 1],
            response_capacity: capacity,
            write_payload: write.map(<[u8]>::to_vec),
            shm: shm.map(|capacity| ShmTarget { path: "/sysctl-test".into(), capacity }),
        })
    }

    #[test]
    fn zero_capacity_omits_read_buffer() {
        let req = by_name(0, None);
        let buffers = validate(&req, &LIMITS).unwrap();
        assert_eq!(buffers.read, ReadTarget::Omitted);
        assert_eq!(buffers.write, None);
    }

    #[test]
    fn capacity_at_limit_allocates_exactly() {
        let req = by_name(1024 * 1024, None);
        let buffers = validate(&req, &LIMITS).unwrap();
        assert_eq!(buffers.read.capacity(), Some(1024 * 1024));
    }

    #[test]
    fn capacity_over_limit_is_fatal() {
        let req = by_name(1024 * 1024 + 1, None);
        assert!(matches!(
            validate(&req, &LIMITS),
            Err(Fatal::CapacityTooLarge { requested: 1_048_577, max: 1_048_576 })
        ));
        let req = by_path(Some(u64::MAX), None, None);
        assert!(matches!(validate(&req, &LIMITS), Err(Fatal::CapacityTooLarge { .. })));
    }

    #[test]
    fn pure_write_borrows_payload_without_read_buffer() {
        let req = by_path(None, None, Some(&[1, 0, 0, 0]));
        let buffers = validate(&req, &LIMITS).unwrap();
        assert_eq!(buffers.read, ReadTarget::Omitted);
        let Request::ByPath(inner) = &req else { unreachable!() };
        let payload = inner.write_payload.as_deref().unwrap();
        assert!(std::ptr::eq(buffers.write.unwrap(), payload));
    }

    #[test]
    fn shm_capacity_bounds_the_request() {
        let req = by_path(Some(65), Some(64), None);
        assert!(matches!(
            validate(&req, &LIMITS),
            Err(Fatal::CapacityExceedsShm { requested: 65, capacity: 64 })
        ));
    }

    #[test]
    fn shm_target_skips_inline_limit() {
        let big = 4 * 1024 * 1024;
        let req = by_path(Some(big), Some(big), None);
        let buffers = validate(&req, &LIMITS).unwrap();
        assert!(matches!(buffers.read, ReadTarget::Shared { len, .. } if len as u64 == big));
    }

    #[test]
    fn shm_discovery_and_write_keep_the_target() {
        for capacity in [Some(0), None] {
            let req = by_path(capacity, Some(64), Some(&[1]));
            let buffers = validate(&req, &LIMITS).unwrap();
            assert!(matches!(buffers.read, ReadTarget::Shared { len: 0, .. }));
        }
    }
}
