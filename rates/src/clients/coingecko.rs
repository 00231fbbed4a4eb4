//! CoinGecko simple price client.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use valutatrade_common::{Currency, CurrencyPair};

use super::ensure_success;
use crate::config::RatesConfig;
use crate::error::{validate_rate, RatesError, RatesResult};
use crate::source::{FetchedRates, SourceClient};

const PROVIDER: &str = "CoinGecko";

/// `{"bitcoin": {"usd": 59337.21}, ...}`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// Crypto prices from CoinGecko, reported as `CODE_BASE`.
pub struct CoinGeckoClient {
    client: Client,
    url: String,
    base: Currency,
    /// Ticker to CoinGecko id.
    ids: BTreeMap<Currency, String>,
}

impl CoinGeckoClient {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        base: Currency,
        ids: BTreeMap<Currency, String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            base,
            ids,
        }
    }

    /// Build from configuration. Tickers without an explicit id use their
    /// lower-cased code.
    pub fn from_config(client: Client, config: &RatesConfig) -> RatesResult<Self> {
        let mut ids = BTreeMap::new();
        for code in &config.crypto_currencies {
            let currency = Currency::new(code).map_err(|e| RatesError::Config(e.to_string()))?;
            let id = config
                .crypto_ids
                .get(currency.code())
                .cloned()
                .unwrap_or_else(|| currency.code().to_lowercase());
            ids.insert(currency, id);
        }
        Ok(Self::new(client, &config.coingecko_url, config.base()?, ids))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let ids = self.ids.values().cloned().collect::<Vec<_>>().join(",");
        vec![("ids", ids), ("vs_currencies", self.base.code().to_lowercase())]
    }

    fn parse(&self, body: SimplePriceResponse) -> RatesResult<FetchedRates> {
        let vs = self.base.code().to_lowercase();
        let mut rates = FetchedRates::new();

        for (currency, id) in &self.ids {
            let Some(price) = body.get(id).and_then(|prices| prices.get(&vs)) else {
                debug!(id = %id, "CoinGecko response has no price for id");
                continue;
            };
            let pair = CurrencyPair::new(currency.clone(), self.base.clone());
            let rate = validate_rate(&pair, *price)
                .map_err(|e| RatesError::source_failure(PROVIDER, e.to_string()))?;
            rates.insert(pair, rate);
        }

        if rates.is_empty() {
            return Err(RatesError::source_failure(
                PROVIDER,
                "response contained no usable prices",
            ));
        }
        Ok(rates)
    }
}

#[async_trait]
impl SourceClient for CoinGeckoClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch_rates(&self) -> RatesResult<FetchedRates> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.query())
            .send()
            .await
            .map_err(|e| RatesError::source_failure(PROVIDER, format!("network error: {e}")))?;

        let response = ensure_success(PROVIDER, response).await?;

        let body: SimplePriceResponse = response
            .json()
            .await
            .map_err(|e| RatesError::source_failure(PROVIDER, format!("malformed response: {e}")))?;

        self.parse(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CoinGeckoClient {
        let config = RatesConfig {
            coingecko_url: format!("{}/api/v3/simple/price", server.uri()),
            crypto_currencies: vec!["BTC".into(), "ETH".into()],
            ..Default::default()
        };
        CoinGeckoClient::from_config(Client::new(), &config).unwrap()
    }

    fn pair(key: &str) -> CurrencyPair {
        CurrencyPair::from_key(key).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_rates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("ids", "bitcoin,ethereum"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": { "usd": 59337.21 },
                "ethereum": { "usd": 3720.0 }
            })))
            .mount(&server)
            .await;

        let rates = client_for(&server).fetch_rates().await.unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[&pair("BTC_USD")], 59337.21);
        assert_eq!(rates[&pair("ETH_USD")], 3720.0);
    }

    #[tokio::test]
    async fn test_missing_id_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": { "usd": 59337.21 }
            })))
            .mount(&server)
            .await;

        let rates = client_for(&server).fetch_rates().await.unwrap();
        assert_eq!(rates.len(), 1);
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_rates().await.unwrap_err();
        match err {
            RatesError::SourceFailure { provider, message } => {
                assert_eq!(provider, "CoinGecko");
                assert!(message.contains("503"));
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_rates().await.unwrap_err();
        assert!(err.to_string().contains("rate limit"));
    }

    #[tokio::test]
    async fn test_empty_or_zero_prices_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": { "usd": 0.0 }
            })))
            .mount(&server)
            .await;

        assert!(client_for(&server).fetch_rates().await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_rates().await.unwrap_err();
        assert!(matches!(err, RatesError::SourceFailure { .. }));
    }
}
