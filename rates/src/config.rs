//! Rate subsystem configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use valutatrade_common::{seconds, Currency};

use crate::error::{RatesError, RatesResult};

/// External rate providers that can be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// CoinGecko simple price API (crypto).
    CoinGecko,
    /// ExchangeRate-API latest rates (fiat).
    ExchangeRate,
    /// Built-in deterministic table, for offline use.
    Stub,
}

impl SourceKind {
    /// Parse a source name as accepted on the command line.
    pub fn parse(name: &str) -> RatesResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "coingecko" => Ok(SourceKind::CoinGecko),
            "exchangerate" | "exchangerate-api" => Ok(SourceKind::ExchangeRate),
            "stub" => Ok(SourceKind::Stub),
            other => Err(RatesError::Config(format!(
                "unknown source '{other}', expected 'coingecko', 'exchangerate' or 'stub'"
            ))),
        }
    }
}

/// Which collaborator the resolver asks when the cache has no fresh entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverSourceKind {
    /// Query the configured provider clients.
    #[default]
    Live,
    /// Use the deterministic stub table.
    Stub,
}

/// Configuration for the rate subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Directory holding the cache and history files.
    pub data_dir: PathBuf,
    /// Cache file name inside `data_dir`.
    pub rates_file: String,
    /// History file name inside `data_dir`.
    pub history_file: String,
    /// Freshness window for cached rates.
    pub rates_ttl_seconds: u64,
    /// Per-request network timeout.
    pub request_timeout_secs: u64,
    /// Budget for one `resolve` call.
    pub resolve_timeout_secs: u64,
    /// Budget for one update cycle.
    pub cycle_timeout_secs: u64,
    /// How many sources may be polled at the same time.
    pub max_concurrent_sources: usize,
    /// Sources polled by the updater, in merge order (later wins).
    pub sources: Vec<SourceKind>,
    /// Collaborator used by the resolver on a cache miss.
    pub resolver_source: ResolverSourceKind,
    /// Quote currency used by the provider clients.
    pub base_currency: String,
    pub fiat_currencies: Vec<String>,
    pub crypto_currencies: Vec<String>,
    /// CoinGecko ids by ticker.
    pub crypto_ids: BTreeMap<String, String>,
    pub coingecko_url: String,
    pub exchangerate_url: String,
    pub exchangerate_api_key: Option<String>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        let crypto_ids = [("BTC", "bitcoin"), ("ETH", "ethereum"), ("SOL", "solana")]
            .into_iter()
            .map(|(code, id)| (code.to_string(), id.to_string()))
            .collect();

        Self {
            data_dir: PathBuf::from("data"),
            rates_file: "rates.json".to_string(),
            history_file: "exchange_rates.json".to_string(),
            rates_ttl_seconds: 300,
            request_timeout_secs: 10,
            resolve_timeout_secs: 30,
            cycle_timeout_secs: 60,
            max_concurrent_sources: 4,
            sources: vec![SourceKind::CoinGecko, SourceKind::ExchangeRate],
            resolver_source: ResolverSourceKind::Live,
            base_currency: "USD".to_string(),
            fiat_currencies: vec!["EUR".into(), "GBP".into(), "RUB".into()],
            crypto_currencies: vec!["BTC".into(), "ETH".into(), "SOL".into()],
            crypto_ids,
            coingecko_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            exchangerate_url: "https://v6.exchangerate-api.com/v6".to_string(),
            exchangerate_api_key: None,
        }
    }
}

impl RatesConfig {
    pub fn rates_path(&self) -> PathBuf {
        self.data_dir.join(&self.rates_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(&self.history_file)
    }

    /// Freshness window as a chrono duration.
    pub fn ttl(&self) -> Duration {
        seconds(self.rates_ttl_seconds)
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.resolve_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.cycle_timeout_secs)
    }

    /// Quote currency for provider clients.
    pub fn base(&self) -> RatesResult<Currency> {
        Currency::new(&self.base_currency).map_err(|e| RatesError::Config(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> RatesResult<()> {
        if self.rates_ttl_seconds == 0 {
            return Err(RatesError::Config("rates_ttl_seconds cannot be 0".into()));
        }

        if self.request_timeout_secs == 0
            || self.resolve_timeout_secs == 0
            || self.cycle_timeout_secs == 0
        {
            return Err(RatesError::Config("timeouts cannot be 0".into()));
        }

        if self.max_concurrent_sources == 0 {
            return Err(RatesError::Config(
                "max_concurrent_sources cannot be 0".into(),
            ));
        }

        if self.sources.is_empty() {
            return Err(RatesError::Config("at least one source is required".into()));
        }

        if self.rates_file == self.history_file {
            return Err(RatesError::Config(
                "rates_file and history_file must differ".into(),
            ));
        }

        self.base()?;
        for code in self.fiat_currencies.iter().chain(&self.crypto_currencies) {
            Currency::new(code).map_err(|e| RatesError::Config(e.to_string()))?;
        }

        Ok(())
    }
}
