mod cli;
mod cli_utils;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize structured logging
    taskout::logging::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Record(args) => commands::record::run(args),
        Commands::Fingerprint(args) => commands::fingerprint::run(args),
        Commands::History(args) => commands::history::run(&args.command),
        Commands::Config(args) => commands::config::run(&args.command),
    }
}
