// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unix-socket listener; one named thread per accepted connection
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below + `tests/sysctl_e2e`

use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::session::Session;
use crate::tree::ConfigTree;
use crate::validate::Limits;

/// Errors while binding or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Something other than a socket occupies the socket path.
    #[error("{0} exists and is not a socket")]
    PathOccupied(PathBuf),
    #[error("remove stale socket {path}: {source}")]
    Stale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("chmod {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spawn listener thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("listener thread panicked")]
    Panicked,
}

struct Shared {
    tree: Arc<dyn ConfigTree>,
    limits: Limits,
    max_frame_len: usize,
    io_timeout: Option<Duration>,
    shutdown: AtomicBool,
    next_session: AtomicU64,
}

/// Bound listener, not yet accepting.
pub struct Server {
    listener: UnixListener,
    path: PathBuf,
    shared: Arc<Shared>,
}

impl Server {
    /// Removes a stale socket file, binds `config.socket_path` and applies `config.socket_mode`.
    pub fn bind(config: &ServerConfig, tree: Arc<dyn ConfigTree>) -> Result<Self, ServerError> {
        let path = config.socket_path.clone();
        remove_stale(&path)?;
        let listener = UnixListener::bind(&path)
            .map_err(|source| ServerError::Bind { path: path.clone(), source })?;
        fs::set_permissions(&path, fs::Permissions::from_mode(config.socket_mode))
            .map_err(|source| ServerError::Permissions { path: path.clone(), source })?;
        log::info!("sysctld: listening at {}", path.display());
        let shared = Arc::new(Shared {
            tree,
            limits: Limits { max_response_size: config.max_response_size },
            max_frame_len: config.frame_limit(),
            io_timeout: config.io_timeout(),
            shutdown: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        });
        Ok(Self { listener, path, shared })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until shut down.
    pub fn serve(self) -> Result<(), ServerError> {
        for conn in self.listener.incoming() {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            match conn {
                Ok(stream) => self.start_session(stream),
                Err(err) => log::warn!("sysctld: accept error: {err}"),
            }
        }
        log::info!("sysctld: listener at {} stopped", self.path.display());
        Ok(())
    }

    /// Runs [`Server::serve`] on a background thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let path = self.path.clone();
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("sysctl-listener".into())
            .spawn(move || self.serve())
            .map_err(ServerError::Spawn)?;
        Ok(ServerHandle { path, shared, thread: Some(thread) })
    }

    fn start_session(&self, stream: UnixStream) {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = stream
            .set_read_timeout(self.shared.io_timeout)
            .and_then(|()| stream.set_write_timeout(self.shared.io_timeout))
        {
            log::warn!("sysctld: session {id}: cannot set timeouts: {err}");
            return;
        }
        let session = Session::new(
            id,
            stream,
            Arc::clone(&self.shared.tree),
            self.shared.limits,
            self.shared.max_frame_len,
        );
        let spawned = thread::Builder::new().name(format!("sysctl-session-{id}")).spawn(move || {
            session.run();
        });
        if let Err(err) = spawned {
            log::warn!("sysctld: session {id}: cannot spawn worker: {err}");
        }
    }
}

/// Handle to a listener running on its own thread.
pub struct ServerHandle {
    path: PathBuf,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting, joins the listener and removes the socket file.
    ///
    /// Sessions already running finish on their own when their peers disconnect.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), ServerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.shared.shutdown.store(true, Ordering::Release);
        // Wake the blocking accept.
        if let Err(err) = UnixStream::connect(&self.path) {
            log::debug!("sysctld: wake-up connect failed: {err}");
        }
        let result = thread.join().map_err(|_| ServerError::Panicked).and_then(|r| r);
        if let Err(err) = fs::remove_file(&self.path) {
            log::debug!("sysctld: remove {}: {err}", self.path.display());
        }
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("sysctld: shutdown: {err}");
        }
    }
}

fn remove_stale(path: &Path) -> Result<(), ServerError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            log::debug!("sysctld: removing stale socket {}", path.display());
            fs::remove_file(path).map_err(|source| ServerError::Stale { path: path.to_path_buf(), source })
        }
        Ok(_) => Err(ServerError::PathOccupied(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ServerError::Stale { path: path.to_path_buf(), source }),
    }
}
