//! Orchestrator configuration.
//!
//! Grounded on `elm/ords/process.py::process_counties_with_openai`'s keyword
//! arguments (rate limit, chunk size/overlap, URL count, directory layout)
//! and RKnowledge's `config.rs` (`config_dir`/`load`/env-var
//! expansion for API keys).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_rate_limit() -> f64 {
    4000.0
}

fn default_chunk_size() -> usize {
    3000
}

fn default_chunk_overlap() -> usize {
    300
}

fn default_num_urls() -> usize {
    5
}

fn default_max_browsers() -> usize {
    10
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_min_chunks_to_process() -> usize {
    3
}

fn default_num_to_recall() -> usize {
    2
}

fn default_bad_adder_threshold_ft() -> f64 {
    250.0
}

fn default_location_score_thresh() -> f64 {
    0.8
}

/// Top-level orchestrator configuration, loaded from `config.toml` in the
/// platform config directory or an explicit path handed to `ordsweep run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdsConfig {
    /// Output directory. Created if missing; holds `usage.json`, the log
    /// directory, the cleaned-text directory, and the per-location
    /// ordinance-doc/db directories unless overridden below.
    pub out_dir: PathBuf,
    /// Path to a roster CSV with "County"/"State" (and optional "FIPS")
    /// columns. `None` means "process every known county" -- unsupported by
    /// this implementation; a roster is required.
    pub county_fp: Option<PathBuf>,

    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_rate_limit")]
    pub llm_service_rate_limit: f64,
    #[serde(default = "default_chunk_size")]
    pub text_splitter_chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub text_splitter_chunk_overlap: usize,
    #[serde(default = "default_num_urls")]
    pub num_urls_to_check_per_county: usize,
    #[serde(default = "default_max_browsers")]
    pub max_num_concurrent_browsers: usize,

    #[serde(default = "default_min_chunks_to_process")]
    pub min_chunks_to_process: usize,
    #[serde(default = "default_num_to_recall")]
    pub num_to_recall: usize,
    #[serde(default = "default_bad_adder_threshold_ft")]
    pub bad_adder_threshold_ft: f64,
    #[serde(default = "default_location_score_thresh")]
    pub location_score_thresh: f64,

    pub log_dir: Option<PathBuf>,
    pub clean_dir: Option<PathBuf>,
    pub county_ords_dir: Option<PathBuf>,
    pub county_dbs_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for OrdsConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./ordsweep-out"),
            county_fp: None,
            providers: ProvidersConfig::default(),
            model: default_model(),
            llm_service_rate_limit: default_rate_limit(),
            text_splitter_chunk_size: default_chunk_size(),
            text_splitter_chunk_overlap: default_chunk_overlap(),
            num_urls_to_check_per_county: default_num_urls(),
            max_num_concurrent_browsers: default_max_browsers(),
            min_chunks_to_process: default_min_chunks_to_process(),
            num_to_recall: default_num_to_recall(),
            bad_adder_threshold_ft: default_bad_adder_threshold_ft(),
            location_score_thresh: default_location_score_thresh(),
            log_dir: None,
            clean_dir: None,
            county_ords_dir: None,
            county_dbs_dir: None,
            log_level: default_log_level(),
        }
    }
}

/// Resolved output-directory layout, filling in any directories the config
/// left unset relative to `out_dir`. Mirrors `process.py::_setup_folders`.
pub struct ResolvedDirs {
    pub out_dir: PathBuf,
    pub log_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub county_ords_dir: PathBuf,
    pub county_dbs_dir: PathBuf,
}

impl OrdsConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("could not determine platform config directory")?.join("ordsweep");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let mut config: OrdsConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path.display()))?;
        config.expand_env_vars();
        Ok(config)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            anyhow::bail!("configuration file not found at {}. Run 'ordsweep init' first.", path.display());
        }
        Self::load_from(&path)
    }

    fn expand_env_vars(&mut self) {
        if let Some(p) = self.providers.anthropic.as_mut() {
            p.api_key = expand_env_var(&p.api_key);
        }
        if let Some(p) = self.providers.openai.as_mut() {
            p.api_key = expand_env_var(&p.api_key);
        }
    }

    /// Resolve the output directory layout and create every folder.
    pub fn resolve_dirs(&self) -> Result<ResolvedDirs> {
        let out_dir = self.out_dir.clone();
        let dirs = ResolvedDirs {
            log_dir: self.log_dir.clone().unwrap_or_else(|| out_dir.join("logs")),
            clean_dir: self.clean_dir.clone().unwrap_or_else(|| out_dir.join("clean")),
            county_ords_dir: self.county_ords_dir.clone().unwrap_or_else(|| out_dir.join("county_ord_files")),
            county_dbs_dir: self.county_dbs_dir.clone().unwrap_or_else(|| out_dir.join("county_dbs")),
            out_dir,
        };
        for folder in [&dirs.out_dir, &dirs.log_dir, &dirs.clean_dir, &dirs.county_ords_dir, &dirs.county_dbs_dir] {
            fs::create_dir_all(folder)
                .with_context(|| format!("failed to create output folder {}", folder.display()))?;
        }
        Ok(dirs)
    }
}

/// Expands `${VAR_NAME}` or `$VAR_NAME` references against the process
/// environment; any other value passes through unchanged.
fn expand_env_var(value: &str) -> String {
    if let Some(inner) = value.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(inner).unwrap_or_default()
    } else if let Some(name) = value.strip_prefix('$') {
        std::env::var(name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_process_counties_with_openai_signature() {
        let toml_str = r#"
            out_dir = "./out"
        "#;
        let config: OrdsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.llm_service_rate_limit, 4000.0);
        assert_eq!(config.text_splitter_chunk_size, 3000);
        assert_eq!(config.text_splitter_chunk_overlap, 300);
        assert_eq!(config.num_urls_to_check_per_county, 5);
        assert_eq!(config.max_num_concurrent_browsers, 10);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn expand_env_var_handles_braces_dollar_and_literal() {
        unsafe { std::env::set_var("ORDSWEEP_TEST_KEY", "sk-abc") };
        assert_eq!(expand_env_var("${ORDSWEEP_TEST_KEY}"), "sk-abc");
        assert_eq!(expand_env_var("$ORDSWEEP_TEST_KEY"), "sk-abc");
        assert_eq!(expand_env_var("sk-literal"), "sk-literal");
        unsafe { std::env::remove_var("ORDSWEEP_TEST_KEY") };
    }

    #[test]
    fn resolve_dirs_derives_from_out_dir_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrdsConfig { out_dir: dir.path().join("out"), ..OrdsConfig::default() };
        config.county_fp = None;
        let resolved = config.resolve_dirs().unwrap();
        assert_eq!(resolved.log_dir, dir.path().join("out").join("logs"));
        assert!(resolved.clean_dir.exists());
    }
}
