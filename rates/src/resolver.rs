//! On-demand rate resolution against the persisted cache.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use valutatrade_common::{now, CurrencyPair, CurrencyRegistry, Timestamp};

use crate::cache::{MergeOutcome, RateEntry};
use crate::config::RatesConfig;
use crate::error::{validate_rate, RatesError, RatesResult};
use crate::source::{Quote, RateSource};
use crate::store::RateCacheStore;

/// Source label reported for same-currency lookups.
pub const IDENTITY_SOURCE: &str = "identity";

/// Resolver policy.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum age of a cached entry that is served without refreshing.
    pub ttl: Duration,
    /// Budget for one resolve call, including source I/O and persistence.
    pub timeout: StdDuration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: valutatrade_common::default_rates_ttl(),
            timeout: StdDuration::from_secs(30),
        }
    }
}

impl From<&RatesConfig> for ResolverConfig {
    fn from(config: &RatesConfig) -> Self {
        Self {
            ttl: config.ttl(),
            timeout: config.resolve_timeout(),
        }
    }
}

/// How a resolved rate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Same currency on both sides.
    Identity,
    /// Fresh cache entry.
    Cache,
    /// Computed by the rate source and written back.
    Fetched,
    /// Reciprocal of the fresh mirror entry, written back.
    DerivedInverse,
}

/// Answer to a rate lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    pub pair: CurrencyPair,
    pub rate: f64,
    pub observed_at: Timestamp,
    pub source: String,
    pub origin: RateOrigin,
}

impl ResolvedRate {
    fn from_entry(pair: &CurrencyPair, entry: &RateEntry, origin: RateOrigin) -> Self {
        Self {
            pair: pair.clone(),
            rate: entry.rate,
            observed_at: entry.observed_at,
            source: entry.source.clone(),
            origin,
        }
    }

    /// Rate of the mirror pair, computed on demand.
    pub fn reverse_rate(&self) -> f64 {
        1.0 / self.rate
    }
}

/// Resolves rates from cache, rate source, or inverse derivation, in that order.
pub struct RateResolver {
    store: Arc<RateCacheStore>,
    source: Arc<dyn RateSource>,
    registry: CurrencyRegistry,
    config: ResolverConfig,
}

impl RateResolver {
    /// Create a resolver with the default currency registry.
    pub fn new(
        store: Arc<RateCacheStore>,
        source: Arc<dyn RateSource>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            source,
            registry: CurrencyRegistry::default(),
            config,
        }
    }

    /// Use a custom currency registry.
    pub fn with_registry(mut self, registry: CurrencyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }

    /// Resolve the rate for two raw currency codes.
    ///
    /// Unknown codes fail with [`RatesError::CurrencyNotFound`] before any I/O.
    pub async fn resolve(&self, base: &str, quote: &str) -> RatesResult<ResolvedRate> {
        let pair = CurrencyPair::new(self.registry.currency(base)?, self.registry.currency(quote)?);
        self.resolve_pair(&pair).await
    }

    /// Resolve the rate for a pair.
    #[instrument(skip(self), fields(pair = %pair))]
    pub async fn resolve_pair(&self, pair: &CurrencyPair) -> RatesResult<ResolvedRate> {
        for currency in [&pair.base, &pair.quote] {
            if !self.registry.contains(currency) {
                return Err(RatesError::CurrencyNotFound(currency.code().to_string()));
            }
        }

        if pair.is_identity() {
            return Ok(ResolvedRate {
                pair: pair.clone(),
                rate: 1.0,
                observed_at: now(),
                source: IDENTITY_SOURCE.to_string(),
                origin: RateOrigin::Identity,
            });
        }

        tokio::time::timeout(self.config.timeout, self.resolve_non_identity(pair))
            .await
            .map_err(|_| {
                RatesError::Timeout(format!(
                    "resolving {pair} took longer than {:?}",
                    self.config.timeout
                ))
            })?
    }

    async fn resolve_non_identity(&self, pair: &CurrencyPair) -> RatesResult<ResolvedRate> {
        let cache = self.store.load().await;
        if let Some(entry) = cache.fresh_entry(pair, self.config.ttl, now()) {
            debug!(source = %entry.source, "Using cached rate");
            return Ok(ResolvedRate::from_entry(pair, entry, RateOrigin::Cache));
        }
        debug!("Cache miss");

        match self.compute(pair).await {
            Ok(quote) => {
                let entry = RateEntry::new(pair, quote.rate, now(), quote.source)?;
                self.write_back(pair, &entry).await?;
                info!(rate = entry.rate, source = %entry.source, "Rate refreshed from source");
                return Ok(ResolvedRate::from_entry(pair, &entry, RateOrigin::Fetched));
            }
            Err(e) => {
                warn!(error = %e, "Rate source failed, trying inverse pair");
            }
        }

        let inverse_pair = pair.inverse();
        let cache = self.store.load().await;
        let Some(inverse) = cache.fresh_entry(&inverse_pair, self.config.ttl, now()) else {
            return Err(RatesError::RateUnavailable(pair.clone()));
        };

        let entry = RateEntry::new(
            pair,
            inverse.reverse_rate(),
            now(),
            format!("{} (inverse)", inverse.source),
        )?;
        self.write_back(pair, &entry).await?;
        info!(rate = entry.rate, inverse = %inverse_pair, "Rate derived from inverse pair");

        Ok(ResolvedRate::from_entry(pair, &entry, RateOrigin::DerivedInverse))
    }

    async fn compute(&self, pair: &CurrencyPair) -> RatesResult<Quote> {
        let quote = self.source.quote(pair).await?;
        validate_rate(pair, quote.rate)?;
        Ok(quote)
    }

    async fn write_back(&self, pair: &CurrencyPair, entry: &RateEntry) -> RatesResult<()> {
        let outcome = self
            .store
            .update(|cache| {
                let outcome = cache.merge_entry(pair.clone(), entry.clone());
                if outcome.is_applied() {
                    cache.touch(entry.observed_at);
                }
                outcome
            })
            .await?;

        if outcome == MergeOutcome::KeptNewer {
            debug!("Cache already holds a newer observation, kept it");
        }
        Ok(())
    }
}
