//! HTTP clients for external rate providers.

mod coingecko;
mod exchangerate;

pub use coingecko::CoinGeckoClient;
pub use exchangerate::ExchangeRateApiClient;

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};

use crate::config::{RatesConfig, SourceKind};
use crate::error::{RatesError, RatesResult};
use crate::source::{SourceClient, StubRates};

/// Maximum number of body characters quoted in an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Build the shared HTTP client with the configured per-request timeout.
pub fn http_client(config: &RatesConfig) -> RatesResult<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| RatesError::Config(format!("failed to create HTTP client: {e}")))
}

/// Build one client per configured source, preserving configuration order.
pub fn build_clients(
    config: &RatesConfig,
    kinds: &[SourceKind],
) -> RatesResult<Vec<Arc<dyn SourceClient>>> {
    let http = http_client(config)?;

    kinds
        .iter()
        .map(|kind| -> RatesResult<Arc<dyn SourceClient>> {
            Ok(match kind {
                SourceKind::CoinGecko => Arc::new(CoinGeckoClient::from_config(http.clone(), config)?),
                SourceKind::ExchangeRate => {
                    Arc::new(ExchangeRateApiClient::from_config(http.clone(), config)?)
                }
                SourceKind::Stub => Arc::new(StubRates::new()),
            })
        })
        .collect()
}

/// Turn a non-success response into a source failure quoting the status and body.
async fn ensure_success(provider: &str, response: Response) -> RatesResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RatesError::source_failure(
            provider,
            "rate limit exceeded, retry later",
        ));
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    Err(RatesError::source_failure(
        provider,
        format!("HTTP {status}: {snippet}"),
    ))
}
