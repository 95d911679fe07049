//! Command-line interface and configuration loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use vg_domain::config::Config;

/// Vantage — competitive-intelligence snapshot and report gateway.
#[derive(Debug, Parser)]
#[command(name = "vantage", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "vantage.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the effective configuration and exit non-zero on errors.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load config from the given file (missing file = defaults), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };
    config.apply_env();
    Ok(config)
}
