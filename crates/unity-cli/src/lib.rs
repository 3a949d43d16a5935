//! Unity CLI - `unity-tree` binary internals
//!
//! Subcommands:
//! - `serve`: leaves server for the event-stream backend
//! - `submit`: add a leaf
//! - `show`: print the tree
//! - `watch`: follow additions
//! - `reset-cache`: drop the local snapshot

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod telemetry;

use clap::ArgMatches;
use std::path::PathBuf;
use std::process::ExitCode;

pub use config::{AppConfig, CacheConfig};

/// Load configuration and dispatch the selected subcommand
///
/// # Errors
/// Configuration, store or service failures
pub async fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    cli::apply_overrides(&mut config, matches);
    tracing::debug!(backend = %config.store.backend, "Configuration ready");

    match matches.subcommand() {
        Some(("serve", _)) => commands::serve(&config).await,
        Some(("submit", args)) => {
            let name = args.get_one::<String>("name").map_or("", String::as_str);
            let city = args.get_one::<String>("city").map(String::as_str);
            commands::submit(&config, name, city).await
        }
        Some(("show", args)) => commands::show(&config, args.get_flag("json")).await,
        Some(("watch", _)) => commands::watch(&config).await,
        Some(("reset-cache", _)) => commands::reset_cache(&config),
        _ => Ok(ExitCode::FAILURE),
    }
}
