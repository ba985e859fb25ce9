//! changesense CLI entry point.

use changesense::cli::{self, Cli, Commands, EXIT_ERROR};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    cli::init_logging(cli.global.verbose);

    let result = match &cli.command {
        Commands::Diff(args) => cli::run_diff(&cli.global, args),
        Commands::Dirs(args) => cli::run_dirs(&cli.global, args),
        Commands::Init(args) => cli::run_init(args),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}
