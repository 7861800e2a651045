//! Mars CLI - inspect, convert and repair molecule archives
//!
//! The binary in `main.rs` only parses arguments and installs logging; every
//! command runs through [`run`] so it can be driven in-process.

pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{OutputContext, convert, info, list, recover, tags};

/// Command-line interface for Mars molecule archives
#[derive(Parser, Debug)]
#[command(name = "mars")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "MARS_CONFIG")]
    pub config: Option<String>,

    /// Load archives into a memory-mapped store instead of RAM
    #[arg(long = "virtual")]
    pub virtual_store: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Output in CSV format
    #[arg(long)]
    pub csv: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show archive properties, counts and tags
    Info(info::InfoArgs),
    /// List molecules with their tags
    List(list::ListArgs),
    /// Re-encode an archive as binary or text
    Convert(convert::ConvertArgs),
    /// Delete every molecule carrying a tag and save in place
    DeleteTag(tags::DeleteTagArgs),
    /// Rebuild an archive from a virtual store left behind by a crash
    Recover(recover::RecoverArgs),
}

/// Execute a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    let cfg = config::Config::load(cli.config.as_deref())?;
    let archive_config = cfg.archive_config(cli.virtual_store);

    let output = OutputContext {
        json: cli.json,
        csv: cli.csv,
        verbose: cli.verbose,
        assume_yes: cfg.assume_yes,
    };

    match cli.command {
        Commands::Info(args) => info::execute(args, &archive_config, &output),
        Commands::List(args) => list::execute(args, &archive_config, &output),
        Commands::Convert(args) => convert::execute(args, &archive_config, &output),
        Commands::DeleteTag(args) => tags::execute(args, &archive_config, &output),
        Commands::Recover(args) => recover::execute(args, &archive_config, &output),
    }
}
