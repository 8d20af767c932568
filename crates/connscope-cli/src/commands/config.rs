use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use connscope_core::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Print the effective configuration (API keys masked)
    Show,
}

pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Init { force } => run_init(config_path, force),
        ConfigCommands::Show => run_show(config_path),
    }
}

fn run_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let written = Config::default().save(Some(&path))?;
    println!(
        "  {} {}",
        console::style("config saved ->").green().bold(),
        written.display(),
    );
    println!("  Set API keys in the file or via environment:");
    println!("    {}", console::style("export AI_API_KEY=...").green());
    println!("    {}", console::style("export ABUSEIPDB_API_KEY=...").green());
    Ok(())
}

fn mask(key: &mut Option<String>) {
    if let Some(k) = key.as_mut() {
        let visible: String = k.chars().take(4).collect();
        *k = format!("{visible}****");
    }
}

fn run_show(config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load(config_path)?;
    mask(&mut config.ai.api_key);
    mask(&mut config.threat_intel.abuseipdb_api_key);

    let path = config_path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    println!(
        "  {} {}{}\n",
        console::style("config:").cyan().bold(),
        path.display(),
        if path.exists() { "" } else { " (not found, showing defaults)" },
    );
    let text = toml::to_string_pretty(&config).context("failed to render config")?;
    println!("{}", text);
    Ok(())
}
