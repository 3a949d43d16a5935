//! Command-line definition

use crate::config::AppConfig;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use unity_store::Backend;

/// Build the `unity-tree` command
#[must_use]
pub fn command() -> Command {
    Command::new("unity-tree")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Tree of Unity: one leaf per visitor, shared by every screen")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .env("UNITY_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .global(true)
                .env("UNITY_BACKEND")
                .value_parser(value_parser!(Backend))
                .help("Remote store: memory, event-stream or realtime-db"),
        )
        .arg(
            Arg::new("url")
                .long("url")
                .global(true)
                .env("UNITY_URL")
                .help("Leaves server or database URL"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .global(true)
                .env("UNITY_CACHE_DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for the local tree snapshot"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .env("UNITY_LOG")
                .default_value("info")
                .help("Log filter when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("serve")
                .about("Run a leaves server for the event-stream backend")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .env("UNITY_BIND")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Listen address"),
                )
                .arg(
                    Arg::new("allow-duplicate-slots")
                        .long("allow-duplicate-slots")
                        .action(ArgAction::SetTrue)
                        .help("Accept a second leaf on an occupied slot"),
                ),
        )
        .subcommand(
            Command::new("submit")
                .about("Add a leaf and print the slot it landed on")
                .arg(
                    Arg::new("name")
                        .long("name")
                        .required(true)
                        .help("Name written on the leaf"),
                )
                .arg(Arg::new("city").long("city").help("City shown with the name")),
        )
        .subcommand(
            Command::new("show")
                .about("Print every leaf on the tree")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the snapshot as JSON"),
                ),
        )
        .subcommand(Command::new("watch").about("Print leaves as they are added"))
        .subcommand(Command::new("reset-cache").about("Delete the local tree snapshot"))
}

/// Fold command-line values into the file configuration
pub fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) {
    if let Some(backend) = matches.get_one::<Backend>("backend") {
        config.store.backend = *backend;
    }
    if let Some(url) = matches.get_one::<String>("url") {
        config.store.base_url = Some(url.clone());
    }
    if let Some(dir) = matches.get_one::<PathBuf>("cache-dir") {
        config.cache.dir = Some(dir.clone());
    }
    if let Some(("serve", serve)) = matches.subcommand() {
        if let Some(bind) = serve.get_one::<SocketAddr>("bind") {
            config.server.bind = *bind;
        }
        if serve.get_flag("allow-duplicate-slots") {
            config.server.unique_slots = false;
        }
    }
}
