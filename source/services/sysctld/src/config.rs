// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Daemon configuration (TOML file + environment overrides)
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + `tests/config_file.rs`
//!
//! Load order: built-in defaults, then the TOML file named by `--config` or
//! `NEXUS_SYSCTL_CONFIG`, then `NEXUS_SYSCTL_SOCK` for the socket path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toml::Value;

use crate::tree::{builtin_tree, MemTree, NodeValue, TreeError};

/// Environment variable naming the TOML configuration file.
pub const ENV_CONFIG: &str = "NEXUS_SYSCTL_CONFIG";
/// Environment variable overriding the socket path.
pub const ENV_SOCKET: &str = "NEXUS_SYSCTL_SOCK";

/// Largest inline response the server allocates by default (1 MiB, shared with the client).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = sysctl_remote::DEFAULT_MAX_RESPONSE_SIZE;
/// Envelope slack added on top of the response limit for incoming frames.
const FRAME_SLACK: usize = 64 * 1024;

/// Errors while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("node {name:?}: {reason}")]
    Node { name: String, reason: String },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Value kind of a configured node.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Int,
    Long,
    String,
    Opaque,
}

/// One node seeded into the in-memory tree.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub path: Vec<i32>,
    pub kind: NodeKind,
    pub value: Value,
    #[serde(default)]
    pub writable: bool,
}

impl NodeConfig {
    /// Converts the configured TOML value into a typed node value.
    pub fn node_value(&self) -> Result<NodeValue, ConfigError> {
        let bad = |reason: &str| ConfigError::Node { name: self.name.clone(), reason: reason.into() };
        match (self.kind, &self.value) {
            (NodeKind::Int, Value::Integer(v)) => {
                i32::try_from(*v).map(NodeValue::Int).map_err(|_| bad("value does not fit i32"))
            }
            (NodeKind::Long, Value::Integer(v)) => Ok(NodeValue::Long(*v)),
            (NodeKind::String, Value::String(s)) => Ok(NodeValue::String(s.clone())),
            (NodeKind::Opaque, Value::String(s)) => Ok(NodeValue::Opaque(s.as_bytes().to_vec())),
            (NodeKind::Opaque, Value::Array(items)) => items
                .iter()
                .map(|item| item.as_integer().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(NodeValue::Opaque)
                .ok_or_else(|| bad("opaque arrays hold bytes (0..=255)")),
            _ => Err(bad("value does not match kind")),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_response_size: usize,
    /// Bound on every incoming frame; derived from `max_response_size` when unset.
    pub max_frame_len: Option<usize>,
    pub socket_mode: u32,
    pub io_timeout_ms: Option<u64>,
    pub nodes: Vec<NodeConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(sysctl_remote::DEFAULT_SOCKET_PATH),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            max_frame_len: None,
            socket_mode: 0o600,
            io_timeout_ms: None,
            nodes: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults plus `path` (if any) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse { path: path.to_path_buf(), message },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text)
            .map_err(|err| ConfigError::Parse { path: PathBuf::from("<inline>"), message: err.to_string() })
    }

    /// Applies `NEXUS_SYSCTL_SOCK`.
    pub fn apply_env(&mut self) {
        if let Some(sock) = std::env::var_os(ENV_SOCKET).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(sock);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "socket_path", reason: "must not be empty".into() });
        }
        if self.max_response_size == 0 || u32::try_from(self.max_response_size).is_err() {
            return Err(ConfigError::Invalid {
                field: "max_response_size",
                reason: "must be between 1 and u32::MAX".into(),
            });
        }
        if let Some(frame) = self.max_frame_len {
            if frame <= self.max_response_size || u32::try_from(frame).is_err() {
                return Err(ConfigError::Invalid {
                    field: "max_frame_len",
                    reason: "must exceed max_response_size and fit u32".into(),
                });
            }
        }
        if self.socket_mode > 0o777 {
            return Err(ConfigError::Invalid { field: "socket_mode", reason: "not a permission mode".into() });
        }
        if self.io_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid { field: "io_timeout_ms", reason: "must be non-zero".into() });
        }
        Ok(())
    }

    /// Effective bound on incoming frames.
    pub fn frame_limit(&self) -> usize {
        self.max_frame_len.unwrap_or(self.max_response_size.saturating_add(FRAME_SLACK))
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    /// Tree seeded from `nodes`, or the built-in nodes when none are listed.
    pub fn build_tree(&self) -> Result<MemTree, ConfigError> {
        if self.nodes.is_empty() {
            return Ok(builtin_tree());
        }
        let tree = MemTree::new();
        for node in &self.nodes {
            tree.insert(&node.name, &node.path, node.node_value()?, node.writable)?;
        }
        Ok(tree)
    }
}
