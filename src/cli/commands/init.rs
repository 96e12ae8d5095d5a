//! `ordsweep init` -- write a starter configuration file.
//!
//! Grounded on RKnowledge's `cli/commands/init.rs`: a spinner-driven
//! config scaffold. RKnowledge's Neo4j/Docker bootstrapping has no
//! counterpart here -- this crate's output is flat files (usage.json, a
//! CSV table, per-location logs), not a graph database, so there's nothing
//! to containerize.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{OrdsConfig, ProviderConfig, ProvidersConfig};

static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "");

pub async fn run(force: bool) -> Result<()> {
    println!();
    println!("{}", style(" ordsweep - Initialization ").bold().reverse());
    println!();

    let config_path = OrdsConfig::config_path()?;
    let config_dir = OrdsConfig::config_dir()?;

    if config_path.exists() && !force {
        println!(
            "{}Configuration already exists at {}",
            WARN,
            style(config_path.display()).cyan()
        );
        println!("  Use {} to overwrite", style("--force").yellow());
        return Ok(());
    }

    fs::create_dir_all(&config_dir).context("failed to create config directory")?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template(&format!("{}{{spinner:.green}} {{msg}}", GEAR))
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Creating configuration...");

    let default_config = OrdsConfig {
        providers: ProvidersConfig {
            anthropic: Some(ProviderConfig {
                api_key: "${ANTHROPIC_API_KEY}".to_string(),
                base_url: None,
            }),
            openai: Some(ProviderConfig {
                api_key: "${OPENAI_API_KEY}".to_string(),
                base_url: None,
            }),
        },
        ..OrdsConfig::default()
    };

    let config_content = toml::to_string_pretty(&default_config)?;
    fs::write(&config_path, config_content).context("failed to write config file")?;
    spinner.finish_and_clear();

    println!(
        "{}Created configuration at {}",
        CHECK,
        style(config_path.display()).cyan()
    );

    println!();
    println!("{}", style("-".repeat(50)).dim());
    println!();
    println!("{}Next steps:", ROCKET);
    println!();
    println!("  {}Set an API key and a county roster path in the config file:", KEY);
    println!("    {}", style(config_path.display()).cyan());
    println!();
    println!("  {}Run the pipeline:", ROCKET);
    println!("    {} ordsweep run", style("$").dim());
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_with_placeholder_provider_keys() {
        let config = OrdsConfig {
            providers: ProvidersConfig {
                anthropic: Some(ProviderConfig { api_key: "${ANTHROPIC_API_KEY}".to_string(), base_url: None }),
                openai: Some(ProviderConfig { api_key: "${OPENAI_API_KEY}".to_string(), base_url: None }),
            },
            ..OrdsConfig::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("ANTHROPIC_API_KEY"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }
}
