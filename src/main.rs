//! texpand CLI entry point.
//!
//! Parses arguments, wires up logging, runs the expansion, and prints the
//! result. Expanded YAML goes to stdout; diagnostics go to stderr with a
//! nonzero exit code.

use clap::Parser;
use colored::Colorize;
use texpand::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG drives logging; without it the CLI stays quiet.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.run() {
        Ok(output) => {
            print!("{output}");
        }
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
