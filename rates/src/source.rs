//! Rate source traits and implementations.
//!
//! [`SourceClient`] is the bulk contract polled by the updater: one call
//! returns every pair a provider knows about. [`RateSource`] is the
//! single-pair contract the resolver falls back to on a cache miss.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use valutatrade_common::{Currency, CurrencyPair};

use crate::error::{RatesError, RatesResult};

/// Rates reported by one provider, keyed by pair.
pub type FetchedRates = BTreeMap<CurrencyPair, f64>;

/// Trait for external rate providers polled by the updater.
///
/// Implementations must fail with [`RatesError::SourceFailure`] instead of
/// returning partial or zero-filled data.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Source label recorded with every rate this client reports.
    fn name(&self) -> &str;

    /// Fetch all rates this provider offers.
    async fn fetch_rates(&self) -> RatesResult<FetchedRates>;
}

/// A computed rate together with the label of whoever produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub rate: f64,
    pub source: String,
}

/// Trait for computing a single rate on demand.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source label recorded with computed rates.
    fn name(&self) -> &str;

    /// Compute the rate for `pair` (quote units per base unit).
    async fn compute_rate(&self, pair: &CurrencyPair) -> RatesResult<f64>;

    /// Compute the rate for `pair` and name the provider that supplied it.
    ///
    /// Sources that front several providers override this to report the one
    /// that answered; the default labels the rate with [`RateSource::name`].
    async fn quote(&self, pair: &CurrencyPair) -> RatesResult<Quote> {
        let rate = self.compute_rate(pair).await?;
        Ok(Quote {
            rate,
            source: self.name().to_string(),
        })
    }
}

/// Deterministic USD-anchored rate table.
///
/// Any pair of known currencies is computed by crossing through USD. As a
/// [`SourceClient`] it reports every `X_USD` pair in the table.
pub struct StubRates {
    name: String,
    usd_values: BTreeMap<Currency, f64>,
}

impl StubRates {
    /// Create the stub with the built-in table.
    pub fn new() -> Self {
        let usd_values = [
            ("USD", 1.0),
            ("EUR", 1.1),
            ("GBP", 1.27),
            ("RUB", 0.011),
            ("BTC", 45000.0),
            ("ETH", 3000.0),
            ("SOL", 150.0),
        ]
        .into_iter()
        .filter_map(|(code, value)| Currency::new(code).ok().map(|c| (c, value)))
        .collect();

        Self {
            name: "Stub".to_string(),
            usd_values,
        }
    }

    /// Override or add the USD value of one currency.
    pub fn with_usd_value(mut self, currency: Currency, value: f64) -> Self {
        self.usd_values.insert(currency, value);
        self
    }

    fn usd_value(&self, currency: &Currency) -> Option<f64> {
        self.usd_values.get(currency).copied()
    }
}

impl Default for StubRates {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateSource for StubRates {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compute_rate(&self, pair: &CurrencyPair) -> RatesResult<f64> {
        match (self.usd_value(&pair.base), self.usd_value(&pair.quote)) {
            (Some(base), Some(quote)) => Ok(base / quote),
            _ => Err(RatesError::source_failure(
                &self.name,
                format!("no stub value for {pair}"),
            )),
        }
    }
}

#[async_trait]
impl SourceClient for StubRates {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self) -> RatesResult<FetchedRates> {
        let usd = Currency::usd();
        Ok(self
            .usd_values
            .iter()
            .filter(|(currency, _)| **currency != usd)
            .map(|(currency, value)| (CurrencyPair::new(currency.clone(), usd.clone()), *value))
            .collect())
    }
}

/// Live single-pair source over the configured provider clients.
///
/// Clients are asked in order; the first one that reports the pair directly
/// wins and its name becomes the quote's source. Inverse quotes are not
/// derived here.
pub struct ClientRateSource {
    clients: Vec<Arc<dyn SourceClient>>,
}

impl ClientRateSource {
    pub fn new(clients: Vec<Arc<dyn SourceClient>>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl RateSource for ClientRateSource {
    fn name(&self) -> &str {
        "Live"
    }

    async fn compute_rate(&self, pair: &CurrencyPair) -> RatesResult<f64> {
        self.quote(pair).await.map(|quote| quote.rate)
    }

    async fn quote(&self, pair: &CurrencyPair) -> RatesResult<Quote> {
        let mut failures = Vec::new();

        for client in &self.clients {
            match client.fetch_rates().await {
                Ok(rates) => {
                    if let Some(rate) = rates.get(pair) {
                        debug!(provider = client.name(), pair = %pair, rate, "Got rate from provider");
                        return Ok(Quote {
                            rate: *rate,
                            source: client.name().to_string(),
                        });
                    }
                }
                Err(e) => {
                    warn!(provider = client.name(), pair = %pair, error = %e, "Provider failed to return rates");
                    failures.push(format!("{}: {}", client.name(), e));
                }
            }
        }

        let message = if failures.is_empty() {
            format!("no provider quotes {pair}")
        } else {
            failures.join("; ")
        };
        Err(RatesError::source_failure("Live", message))
    }
}

/// Mock provider client for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockSourceClient {
    name: String,
    rates: dashmap::DashMap<CurrencyPair, f64>,
    failure: parking_lot::Mutex<Option<String>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSourceClient {
    /// Create a new mock client.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            failure: parking_lot::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Set a rate for a pair-key such as `"BTC_USD"`.
    pub fn set_rate(&self, key: &str, rate: f64) {
        if let Ok(pair) = CurrencyPair::from_key(key) {
            self.rates.insert(pair, rate);
        }
    }

    /// Make every subsequent fetch fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Make subsequent fetches succeed again.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of fetches performed.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SourceClient for MockSourceClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self) -> RatesResult<FetchedRates> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(message) = self.failure.lock().clone() {
            return Err(RatesError::source_failure(&self.name, message));
        }
        Ok(self
            .rates
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }
}

/// Mock single-pair source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    inner: MockSourceClient,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: MockSourceClient::new(name),
        }
    }

    pub fn set_rate(&self, key: &str, rate: f64) {
        self.inner.set_rate(key, rate);
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        self.inner.fail_with(message);
    }

    pub fn recover(&self) {
        self.inner.recover();
    }

    /// Number of `compute_rate` calls performed.
    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn compute_rate(&self, pair: &CurrencyPair) -> RatesResult<f64> {
        let rates = self.inner.fetch_rates().await?;
        rates.get(pair).copied().ok_or_else(|| {
            RatesError::source_failure(self.inner.name(), format!("no rate for {pair}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(key: &str) -> CurrencyPair {
        CurrencyPair::from_key(key).unwrap()
    }

    #[tokio::test]
    async fn test_stub_crosses_through_usd() {
        let stub = StubRates::new();

        assert_eq!(stub.compute_rate(&pair("BTC_USD")).await.unwrap(), 45000.0);
        assert_eq!(stub.compute_rate(&pair("BTC_ETH")).await.unwrap(), 15.0);
        let usd_eur = stub.compute_rate(&pair("USD_EUR")).await.unwrap();
        assert!((usd_eur - 1.0 / 1.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_stub_unknown_currency_fails() {
        let stub = StubRates::new();
        let result = stub.compute_rate(&pair("XYZ_USD")).await;
        assert!(matches!(result, Err(RatesError::SourceFailure { .. })));
    }

    #[tokio::test]
    async fn test_stub_as_client_reports_usd_pairs() {
        let stub = StubRates::new();
        let rates = SourceClient::fetch_rates(&stub).await.unwrap();

        assert_eq!(rates.len(), 6);
        assert_eq!(rates[&pair("ETH_USD")], 3000.0);
        assert!(!rates.contains_key(&pair("USD_USD")));
    }

    #[tokio::test]
    async fn test_mock_client() {
        let client = MockSourceClient::new("test");
        client.set_rate("EUR_USD", 1.08);

        let rates = client.fetch_rates().await.unwrap();
        assert_eq!(rates[&pair("EUR_USD")], 1.08);

        client.fail_with("HTTP 503");
        assert!(client.fetch_rates().await.is_err());
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_client_rate_source_first_direct_quote_wins() {
        let down = Arc::new(MockSourceClient::new("down"));
        down.fail_with("connection refused");
        let first = Arc::new(MockSourceClient::new("first"));
        first.set_rate("BTC_USD", 45000.0);
        let second = Arc::new(MockSourceClient::new("second"));
        second.set_rate("BTC_USD", 46000.0);

        let source = ClientRateSource::new(vec![down, first, second.clone()]);

        let quote = source.quote(&pair("BTC_USD")).await.unwrap();
        assert_eq!(quote.rate, 45000.0);
        assert_eq!(quote.source, "first");
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_quote_defaults_to_source_name() {
        let stub = StubRates::new();
        let quote = stub.quote(&pair("ETH_USD")).await.unwrap();
        assert_eq!(quote, Quote { rate: 3000.0, source: "Stub".to_string() });
    }

    #[tokio::test]
    async fn test_client_rate_source_does_not_invert() {
        let client = Arc::new(MockSourceClient::new("only"));
        client.set_rate("BTC_USD", 45000.0);
        let source = ClientRateSource::new(vec![client]);

        let result = source.compute_rate(&pair("USD_BTC")).await;
        assert!(matches!(result, Err(RatesError::SourceFailure { .. })));
    }
}
