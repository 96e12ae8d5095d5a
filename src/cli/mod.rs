pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ordsweep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Async LLM extraction pipeline for regulatory ordinances", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter configuration file to the platform config directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long, default_value = "false")]
        force: bool,
    },

    /// Run the extraction pipeline over a county/parish roster
    Run {
        /// Path to config.toml (defaults to the platform config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to a county roster CSV, overriding the config file's `county_fp`
        #[arg(long)]
        county_fp: Option<PathBuf>,
    },
}
