use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FILE_SIZE_MB: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiSection {
    /// One of `zhipu`, `qwen`, `kimi`, `openai`.
    pub provider: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub temperature: f32,
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            provider: "zhipu".into(),
            api_key: None,
            model: None,
            api_base: None,
            timeout_secs: None,
            max_retries: None,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThreatIntelSection {
    pub enabled: bool,
    pub abuseipdb_api_key: Option<String>,
    pub max_age_days: u32,
    pub verbose: bool,
}

impl Default for ThreatIntelSection {
    fn default() -> Self {
        Self {
            enabled: false,
            abuseipdb_api_key: None,
            max_age_days: 90,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Per-file limit in megabytes; fractions are allowed.
    pub max_file_size_mb: f64,
    /// Reject lines missing any of the nine record keys.
    pub validate_fields: bool,
    pub ai: AiSection,
    pub threat_intel: ThreatIntelSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            data_dir: PathBuf::from("data"),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            validate_fields: true,
            ai: AiSection::default(),
            threat_intel: ThreatIntelSection::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".connscope")
            .join("config.toml")
    }

    /// Loads `path` (or the default location), falling back to defaults when
    /// the file does not exist. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());
        if let Some(key) = var("AI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(key) = var("ABUSEIPDB_API_KEY") {
            self.threat_intel.abuseipdb_api_key = Some(key);
        }
        if let Some(model) = var("CONNSCOPE_AI_MODEL") {
            self.ai.model = Some(model);
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb.max(0.0) * 1024.0 * 1024.0) as u64
    }
}
