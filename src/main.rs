//! scala-depfix CLI entry point.

use clap::Parser;
use scala_depfix::cli::{self, Cli, EXIT_FAILED};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scala_depfix=info"));
    // Logs go to stderr; stdout carries the summaries.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_logging();

    let args = match cli::expand_params(std::env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_FAILED);
        }
    };
    let cli = Cli::parse_from(args);

    let exit_code = match cli::run(&cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILED
        }
    };

    std::process::exit(exit_code);
}
