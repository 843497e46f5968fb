// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: `sysctl` front end for the embedded stack's configuration tree
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests in `format.rs`; protocol paths covered by `tests/sysctl_e2e`

mod format;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use sysctl_remote::{ClientError, SharedRegion, SysctlClient, DEFAULT_SOCKET_PATH};

use crate::format::{encode, parse_oid, render, Format};

/// Read or write configuration-tree nodes of the embedded network stack.
#[derive(Parser, Debug)]
#[command(name = "sysctl", version)]
struct Cli {
    /// Daemon socket.
    #[arg(long, env = "NEXUS_SYSCTL_SOCK", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    /// Value format for printing and for `=VALUE`.
    #[arg(long, value_enum, default_value_t = Format::Auto)]
    format: Format,
    /// Address targets by numeric path (`4.2.0.4`) instead of name.
    #[arg(long)]
    oid: bool,
    /// Receive read results through this POSIX shared-memory object (needs `--oid`).
    #[arg(long, value_name = "NAME", requires = "oid")]
    shm: Option<String>,
    /// `TARGET` reads, `TARGET=VALUE` writes.
    #[arg(required = true)]
    targets: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Format(#[from] format::FormatError),
    #[error(transparent)]
    Shm(#[from] sysctl_remote::ShmError),
    #[error("writes are not supported over shared memory")]
    ShmWrite,
}

impl CliError {
    fn describe(&self) -> String {
        match self {
            Self::Client(err) => match err.errno() {
                Some(code) => io::Error::from_raw_os_error(code).to_string(),
                None => err.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let mut client = SysctlClient::new(&cli.socket);

    let mut failures = 0usize;
    for target in &cli.targets {
        match run_target(&mut client, &cli, target) {
            Ok(line) => println!("{line}"),
            Err(err) => {
                eprintln!("sysctl: {target}: {}", err.describe());
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(format!("{failures} of {} targets failed", cli.targets.len()).into());
    }
    Ok(())
}

fn run_target(client: &mut SysctlClient, cli: &Cli, target: &str) -> Result<String, CliError> {
    let (key, value) = match target.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (target, None),
    };

    if let Some(value) = value {
        if cli.shm.is_some() {
            return Err(CliError::ShmWrite);
        }
        let current = match cli.format {
            Format::Auto => Some(read_inline(client, cli, key)?),
            _ => None,
        };
        let bytes = encode(value, cli.format, current.as_deref())?;
        if cli.oid {
            client.write_by_path(&parse_oid(key)?, &bytes)?;
        } else {
            client.write_by_name(key, &bytes)?;
        }
        return Ok(format!("{key}: {value}"));
    }

    let bytes = match &cli.shm {
        Some(shm) => read_via_shm(client, &parse_oid(key)?, shm)?,
        None => read_inline(client, cli, key)?,
    };
    Ok(format!("{key}: {}", render(&bytes, cli.format)?))
}

fn read_inline(client: &mut SysctlClient, cli: &Cli, key: &str) -> Result<Vec<u8>, CliError> {
    let bytes = if cli.oid { client.read_by_path(&parse_oid(key)?)? } else { client.read_by_name(key)? };
    Ok(bytes)
}

fn read_via_shm(client: &mut SysctlClient, path: &[i32], name: &str) -> Result<Vec<u8>, CliError> {
    let sized = client.get_or_set_by_path(path, None, None)?;
    if !sized.is_ok() {
        return Err(ClientError::Remote(sized.code).into());
    }
    let size = usize::try_from(sized.len).unwrap_or(usize::MAX).max(1);
    let region = SharedRegion::create(name, size)?;
    let result = client.get_by_path_shm(path, &region, size, None);
    let bytes = result.and_then(|reply| {
        if reply.is_ok() {
            Ok(region.as_slice()[..reply.len as usize].to_vec())
        } else {
            Err(ClientError::Remote(reply.code))
        }
    });
    drop(region);
    if let Err(err) = SharedRegion::unlink(name) {
        log::warn!("sysctl: {err}");
    }
    Ok(bytes?)
}
