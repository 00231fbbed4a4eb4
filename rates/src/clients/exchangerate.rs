//! ExchangeRate-API client for fiat rates.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;
use valutatrade_common::{Currency, CurrencyPair};

use super::ensure_success;
use crate::config::RatesConfig;
use crate::error::{validate_rate, RatesError, RatesResult};
use crate::source::{FetchedRates, SourceClient};

const PROVIDER: &str = "ExchangeRate-API";

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    base_code: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// Fiat rates from ExchangeRate-API, reported as `CODE_BASE`.
///
/// The API quotes units of each currency per one base unit, so the reported
/// rate is the reciprocal of the listed value.
pub struct ExchangeRateApiClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    base: Currency,
    currencies: Vec<Currency>,
}

impl ExchangeRateApiClient {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        api_key: Option<String>,
        base: Currency,
        currencies: Vec<Currency>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base,
            currencies,
        }
    }

    pub fn from_config(client: Client, config: &RatesConfig) -> RatesResult<Self> {
        let currencies = config
            .fiat_currencies
            .iter()
            .map(|code| Currency::new(code).map_err(|e| RatesError::Config(e.to_string())))
            .collect::<RatesResult<Vec<_>>>()?;

        Ok(Self::new(
            client,
            &config.exchangerate_url,
            config.exchangerate_api_key.clone(),
            config.base()?,
            currencies,
        ))
    }

    fn parse(&self, body: LatestResponse) -> RatesResult<FetchedRates> {
        if body.result != "success" {
            let reason = body.error_type.unwrap_or_else(|| "unknown error".to_string());
            return Err(RatesError::source_failure(
                PROVIDER,
                format!("API returned error: {reason}"),
            ));
        }

        let base = match body.base_code {
            Some(code) => Currency::new(code)
                .map_err(|e| RatesError::source_failure(PROVIDER, e.to_string()))?,
            None => self.base.clone(),
        };

        let mut rates = FetchedRates::new();
        for currency in &self.currencies {
            let Some(per_base) = body.rates.get(currency.code()) else {
                continue;
            };
            let pair = CurrencyPair::new(currency.clone(), base.clone());
            let per_base = validate_rate(&pair.inverse(), *per_base)
                .map_err(|e| RatesError::source_failure(PROVIDER, e.to_string()))?;
            rates.insert(pair, 1.0 / per_base);
        }

        if rates.is_empty() {
            return Err(RatesError::source_failure(
                PROVIDER,
                "response contained no configured currencies",
            ));
        }
        Ok(rates)
    }
}

#[async_trait]
impl SourceClient for ExchangeRateApiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self), fields(base = %self.base))]
    async fn fetch_rates(&self) -> RatesResult<FetchedRates> {
        let Some(api_key) = &self.api_key else {
            return Err(RatesError::source_failure(
                PROVIDER,
                "API key is not set (EXCHANGERATE_API_KEY)",
            ));
        };

        let url = format!(
            "{}/{}/latest/{}",
            self.url.trim_end_matches('/'),
            api_key,
            self.base
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                RatesError::source_failure(PROVIDER, format!("network error: {}", e.without_url()))
            })?;

        let response = ensure_success(PROVIDER, response).await?;

        let body: LatestResponse = response
            .json()
            .await
            .map_err(|e| RatesError::source_failure(PROVIDER, format!("malformed response: {e}")))?;

        self.parse(body)
    }
}
