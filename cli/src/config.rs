//! Command line configuration.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use valutatrade_rates::RatesConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "VALUTATRADE_CONFIG";

/// Configuration file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "valutatrade.toml";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Rate subsystem settings, the `[rates]` table.
    pub rates: RatesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            rates: RatesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and process environment.
    ///
    /// The file is `path` if given, else `$VALUTATRADE_CONFIG`, else
    /// `./valutatrade.toml` when it exists. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(dir) = env("VALUTATRADE_DATA_DIR") {
            self.rates.data_dir = PathBuf::from(dir);
        }

        if let Some(ttl) = env("RATES_TTL_SECONDS") {
            self.rates.rates_ttl_seconds = ttl
                .trim()
                .parse()
                .with_context(|| format!("RATES_TTL_SECONDS must be a whole number, got '{ttl}'"))?;
        }

        if let Some(key) = env("EXCHANGERATE_API_KEY") {
            self.rates.exchangerate_api_key = Some(key);
        }

        if let Some(level) = env("LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_level.trim().is_empty() {
            bail!("log_level cannot be empty");
        }
        self.rates.validate()?;
        Ok(())
    }
}
