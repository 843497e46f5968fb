// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
#![forbid(unsafe_code)]

//! CONTEXT: sysctld daemon entrypoint
//!
//! Usage: `sysctld [--config PATH]`. Without `--config`, `NEXUS_SYSCTL_CONFIG` is consulted.
//! Logging follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sysctld::{Server, ServerConfig};

/// Serve the embedded stack's configuration tree over a local socket.
#[derive(Parser, Debug)]
#[command(name = "sysctld", version)]
struct Args {
    /// TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref())?;
    let tree = config.build_tree()?;
    log::info!("sysctld: serving {} nodes", tree.len());
    Server::bind(&config, Arc::new(tree))?.serve()?;
    Ok(())
}
