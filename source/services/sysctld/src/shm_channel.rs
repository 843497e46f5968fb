// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Server side of the shared-memory response channel.
//!
//! The returned region is scoped to one cycle: dropping it unmaps and closes on every exit path.

use sysctl_remote::{SharedRegion, ShmTarget};

use crate::error::Fatal;

/// Opens the client's object and maps its declared capacity read-write.
pub fn map_target(target: &ShmTarget) -> Result<SharedRegion, Fatal> {
    match SharedRegion::open(&target.path, target.capacity) {
        Ok(region) => {
            log::trace!("sysctld: mapped {} ({} bytes)", target.path, region.len());
            Ok(region)
        }
        Err(err) => {
            log::debug!("sysctld: cannot map {}: {err}", target.path);
            Err(Fatal::Shm(err))
        }
    }
}
