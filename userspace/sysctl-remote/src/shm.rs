// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: POSIX shared-memory region used as the out-of-band response channel
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (create/open/unlink on the host)
//!
//! The client creates and sizes the object, the server opens the existing object and maps the
//! declared capacity read-write. Both sides unmap and close on drop, on every exit path.

use std::ffi::CString;
use std::io;
use std::ptr::{self, NonNull};

/// Errors produced while creating, opening or mapping a region.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// Name must look like `/name` with no further slashes or NULs.
    #[error("invalid shared-memory name {0:?}")]
    BadName(String),
    /// Mapping zero bytes is not allowed.
    #[error("shared-memory capacity must be non-zero")]
    ZeroCapacity,
    /// Capacity does not fit the platform's size/offset types.
    #[error("shared-memory capacity {0} is not addressable")]
    Unaddressable(u64),
    #[error("shm_open {name:?}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("sizing {name:?}: {source}")]
    Resize {
        name: String,
        #[source]
        source: io::Error,
    },
    /// Existing object is smaller than the capacity the peer declared.
    #[error("{name:?} holds {actual} bytes, {requested} declared")]
    TooSmall { name: String, actual: u64, requested: u64 },
    #[error("mmap {name:?}: {source}")]
    Map {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("shm_unlink {name:?}: {source}")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A mapped, read-write POSIX shared-memory object.
#[derive(Debug)]
pub struct SharedRegion {
    name: String,
    fd: libc::c_int,
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively by this value; access goes through `&self`/`&mut self`.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Creates (or reuses) the object `name`, sizes it to `capacity` and maps it.
    pub fn create(name: &str, capacity: usize) -> Result<Self, ShmError> {
        let c_name = c_name(name)?;
        if capacity == 0 {
            return Err(ShmError::ZeroCapacity);
        }
        let size = libc::off_t::try_from(capacity)
            .map_err(|_| ShmError::Unaddressable(capacity as u64))?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the duration of the call.
        let fd = unsafe {
            libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o600 as libc::c_uint)
        };
        if fd < 0 {
            return Err(ShmError::Open { name: name.to_string(), source: io::Error::last_os_error() });
        }
        // SAFETY: `fd` is an open descriptor owned by this function.
        if unsafe { libc::ftruncate(fd, size) } != 0 {
            let source = io::Error::last_os_error();
            close_fd(fd);
            return Err(ShmError::Resize { name: name.to_string(), source });
        }
        Self::map(name, fd, capacity)
    }

    /// Opens the existing object `name` and maps `capacity` bytes of it read-write.
    pub fn open(name: &str, capacity: u64) -> Result<Self, ShmError> {
        let c_name = c_name(name)?;
        if capacity == 0 {
            return Err(ShmError::ZeroCapacity);
        }
        let len = usize::try_from(capacity).map_err(|_| ShmError::Unaddressable(capacity))?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the duration of the call.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::c_uint) };
        if fd < 0 {
            return Err(ShmError::Open { name: name.to_string(), source: io::Error::last_os_error() });
        }
        let actual = match object_size(fd) {
            Ok(actual) => actual,
            Err(source) => {
                close_fd(fd);
                return Err(ShmError::Open { name: name.to_string(), source });
            }
        };
        if actual < capacity {
            close_fd(fd);
            return Err(ShmError::TooSmall { name: name.to_string(), actual, requested: capacity });
        }
        Self::map(name, fd, len)
    }

    fn map(name: &str, fd: libc::c_int, len: usize) -> Result<Self, ShmError> {
        // SAFETY: fresh shared mapping of an open descriptor; the kernel picks the address.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let source = io::Error::last_os_error();
            close_fd(fd);
            return Err(ShmError::Map { name: name.to_string(), source });
        }
        let Some(base) = NonNull::new(addr.cast::<u8>()) else {
            close_fd(fd);
            return Err(ShmError::Map {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
            });
        };
        log::trace!("shm: mapped {name} ({len} bytes)");
        Ok(Self { name: name.to_string(), fd, base, len })
    }

    /// Removes the object name; existing mappings stay valid until dropped.
    pub fn unlink(name: &str) -> Result<(), ShmError> {
        let c_name = c_name(name)?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the duration of the call.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(ShmError::Unlink { name: name.to_string(), source: io::Error::last_os_error() });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `base` points to `len` mapped bytes that live until `self` is dropped.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes this the only live view through this value.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe the mapping created in `map`; it is unmapped exactly once.
        if unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) } != 0 {
            log::warn!("shm: munmap {} failed: {}", self.name, io::Error::last_os_error());
        }
        close_fd(self.fd);
    }
}

fn c_name(name: &str) -> Result<CString, ShmError> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/');
    if !valid {
        return Err(ShmError::BadName(name.to_string()));
    }
    CString::new(name).map_err(|_| ShmError::BadName(name.to_string()))
}

fn object_size(fd: libc::c_int) -> io::Result<u64> {
    // SAFETY: `stat` is plain old data; zeroed is a valid initial value for fstat to fill.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is open and `st` is a valid out-pointer.
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::try_from(st.st_size).unwrap_or(0))
}

fn close_fd(fd: libc::c_int) {
    // SAFETY: callers pass a descriptor they own and never use it afterwards.
    unsafe {
        libc::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/sysctl-remote-{tag}-{}", std::process::id())
    }

    #[test]
    fn names_are_validated() {
        assert!(matches!(SharedRegion::create("noslash", 16), Err(ShmError::BadName(_))));
        assert!(matches!(SharedRegion::create("/a/b", 16), Err(ShmError::BadName(_))));
        assert!(matches!(SharedRegion::create("/", 16), Err(ShmError::BadName(_))));
        assert!(matches!(SharedRegion::create("/ok", 0), Err(ShmError::ZeroCapacity)));
    }

    #[test]
    fn writes_through_one_mapping_are_visible_in_another() {
        let name = unique("share");
        let mut creator = SharedRegion::create(&name, 64).unwrap();
        creator.as_mut_slice()[..5].copy_from_slice(b"hello");
        let opened = SharedRegion::open(&name, 64).unwrap();
        assert_eq!(&opened.as_slice()[..5], b"hello");
        drop(opened);
        drop(creator);
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn open_rejects_capacity_beyond_object_size() {
        let name = unique("small");
        let _creator = SharedRegion::create(&name, 32).unwrap();
        let err = SharedRegion::open(&name, 4096).unwrap_err();
        assert!(matches!(err, ShmError::TooSmall { actual: 32, requested: 4096, .. }));
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_object_fails() {
        let err = SharedRegion::open(&unique("missing"), 16).unwrap_err();
        assert!(matches!(err, ShmError::Open { .. }));
    }
}
