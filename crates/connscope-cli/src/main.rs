mod banner;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::Cli;

/// Logs go to stderr; stdout carries the step output and the summary.
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("connscope={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    banner::print_banner();

    if let Err(e) = commands::run(cli) {
        eprintln!("{} {e:#}", console::style("error:").red().bold());
        std::process::exit(1);
    }
}
