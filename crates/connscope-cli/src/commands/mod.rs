pub mod analyze;
pub mod intel;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "connscope",
    about = "Analyze Windows network connection logs",
    long_about = "connscope - statistics, anomaly detection, threat-intel lookups and\n\
                  AI-assisted review for JSONL network connection logs.",
    version,
    propagate_version = true,
    styles = STYLES,
)]
pub struct Cli {
    /// Config file (default: ~/.connscope/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a JSONL file or directory and write a Markdown report
    Analyze(analyze::AnalyzeArgs),

    /// Look up an address or CIDR range on AbuseIPDB
    Intel(intel::IntelArgs),

    /// Create or inspect the configuration file
    Config(config::ConfigArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Analyze(args) => analyze::run(args, config_path),
        Commands::Intel(args) => intel::run(args, config_path),
        Commands::Config(args) => config::run(args, config_path),
    }
}

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().bold().underline())
    .usage(AnsiColor::Yellow.on_default().bold())
    .literal(AnsiColor::Cyan.on_default().bold())
    .placeholder(AnsiColor::Cyan.on_default())
    .error(AnsiColor::Red.on_default().bold());

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["connscope", "analyze", "logs/", "-v", "--config", "c.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Analyze(_)));
    }
}
