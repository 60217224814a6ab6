//! Configuration management for verad.
//!
//! Loads settings from /etc/vera/config.toml or uses defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vera/config.toml";

/// Engine limits and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Shell used by the persistent session and the one-shot backend
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Maximum bytes of output kept per command before truncation
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Maximum Execute/Evaluate rounds per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Wall-clock budget for a whole run, in seconds
    #[serde(default = "default_max_execution")]
    pub max_execution_secs: u64,

    /// Result cache time-to-live in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Working directory for spawned shells (None = inherit)
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_command_timeout() -> u64 {
    15
}

fn default_max_output() -> usize {
    16_384
}

fn default_max_iterations() -> usize {
    24
}

fn default_max_execution() -> u64 {
    90
}

fn default_cache_ttl() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command_timeout_secs: default_command_timeout(),
            max_output_bytes: default_max_output(),
            max_iterations: default_max_iterations(),
            max_execution_secs: default_max_execution(),
            cache_ttl_secs: default_cache_ttl(),
            working_dir: None,
        }
    }
}

/// Reasoning oracle endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the Ollama-compatible endpoint
    #[serde(default = "default_oracle_url")]
    pub url: String,

    /// Model used for planning, evaluation and synthesis
    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// HTTP timeout for one oracle round trip, in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

fn default_oracle_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_oracle_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_oracle_timeout() -> u64 {
    60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: default_oracle_url(),
            model: default_oracle_model(),
            timeout_secs: default_oracle_timeout(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub oracle: OracleConfig,
}

impl Config {
    /// Load from the standard path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load() -> Self {
        match Self::load_from(Path::new(CONFIG_PATH)) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default config ({})", e);
                Self::default()
            }
        }
    }

    /// Load and parse a specific config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.shell, "sh");
        assert_eq!(config.engine.command_timeout_secs, 15);
        assert!(config.engine.max_iterations > 0);
        assert!(config.oracle.url.starts_with("http"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [engine]
            max_iterations = 5

            [oracle]
            model = "llama3.2:3b"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.engine.max_iterations, 5);
        assert_eq!(parsed.engine.shell, "sh");
        assert_eq!(parsed.oracle.model, "llama3.2:3b");
        assert_eq!(parsed.oracle.timeout_secs, 60);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let result = Config::load_from(Path::new("/nonexistent/vera.toml"));
        assert!(result.is_err());
    }
}
