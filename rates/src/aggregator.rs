//! Multi-source update cycle.
//!
//! One cycle polls every configured [`SourceClient`], appends the observations
//! to history, and merges them into the cache in a single atomic write. When
//! several sources report the same pair, the one listed last in configuration
//! wins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use valutatrade_common::{now, CurrencyPair, CycleId, Timestamp};

use crate::cache::{MergeOutcome, RateEntry};
use crate::config::RatesConfig;
use crate::error::{validate_rate, RatesError, RatesResult, SourceError};
use crate::history::HistoryRecord;
use crate::source::{FetchedRates, SourceClient};
use crate::store::RateCacheStore;

/// Update cycle limits.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Budget for one provider fetch.
    pub request_timeout: StdDuration,
    /// Budget for a whole cycle, including persistence.
    pub cycle_timeout: StdDuration,
    /// Maximum number of providers polled at once.
    pub max_concurrent_sources: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: StdDuration::from_secs(10),
            cycle_timeout: StdDuration::from_secs(60),
            max_concurrent_sources: 4,
        }
    }
}

impl From<&RatesConfig> for AggregatorConfig {
    fn from(config: &RatesConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            cycle_timeout: config.cycle_timeout(),
            max_concurrent_sources: config.max_concurrent_sources,
        }
    }
}

/// Rates one source returned in this cycle.
#[derive(Debug, Clone)]
struct SourceResult {
    source: String,
    rates: FetchedRates,
    observed_at: Timestamp,
}

/// Outcome of a completed update cycle.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub cycle_id: CycleId,
    /// Pairs written to the cache.
    pub merged_pair_count: usize,
    /// Pairs skipped because the cache already held a newer observation.
    pub stale_skipped: usize,
    /// Winning source per pair-key.
    pub sources: BTreeMap<String, String>,
    /// Sources that failed during the cycle.
    pub errors: Vec<SourceError>,
    pub completed_at: Timestamp,
}

impl UpdateSummary {
    /// True when at least one source failed even though the cycle completed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Polls provider clients and merges their rates into the store.
pub struct RateAggregator {
    clients: Vec<Arc<dyn SourceClient>>,
    store: Arc<RateCacheStore>,
    config: AggregatorConfig,
}

impl RateAggregator {
    pub fn new(
        clients: Vec<Arc<dyn SourceClient>>,
        store: Arc<RateCacheStore>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            clients,
            store,
            config,
        }
    }

    /// Configured client names, in polling order.
    pub fn source_names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// Run one update cycle.
    ///
    /// Fails with [`RatesError::AllSourcesFailed`] when no source produced a
    /// rate, leaving the cache file untouched. Partial failures are reported in
    /// [`UpdateSummary::errors`].
    #[instrument(skip(self), fields(sources = self.clients.len()))]
    pub async fn run_update(&self) -> RatesResult<UpdateSummary> {
        let cycle_id = CycleId::new();
        info!(cycle_id = %cycle_id, "Starting rates update");

        tokio::time::timeout(self.config.cycle_timeout, self.run_cycle(cycle_id))
            .await
            .map_err(|_| {
                RatesError::Timeout(format!(
                    "update cycle {cycle_id} took longer than {:?}",
                    self.config.cycle_timeout
                ))
            })?
    }

    async fn run_cycle(&self, cycle_id: CycleId) -> RatesResult<UpdateSummary> {
        let window = self.config.max_concurrent_sources.max(1);
        let polls: Vec<_> = self
            .clients
            .iter()
            .map(|client| async move { (client.name().to_string(), self.poll(client.as_ref()).await) })
            .collect();
        let results: Vec<(String, RatesResult<SourceResult>)> = stream::iter(polls)
            .buffered(window)
            .collect()
            .await;

        let mut buffer: BTreeMap<CurrencyPair, RateEntry> = BTreeMap::new();
        let mut errors = Vec::new();

        for (name, result) in results {
            match result {
                Ok(result) => {
                    debug!(source = %name, pairs = result.rates.len(), "Source returned rates");
                    self.record_history(cycle_id, &result).await?;

                    for (pair, rate) in &result.rates {
                        let entry = RateEntry::new(pair, *rate, result.observed_at, &result.source)?;
                        buffer.insert(pair.clone(), entry);
                    }
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Source failed during update");
                    errors.push(SourceError {
                        source: name,
                        message: e.to_string(),
                    });
                }
            }
        }

        if buffer.is_empty() {
            warn!(failed = errors.len(), "Update produced no rates, cache left unchanged");
            return Err(RatesError::AllSourcesFailed { errors });
        }

        let completed_at = now();
        let (merged, stale_skipped, sources) = self
            .store
            .update(|cache| {
                let mut merged = 0;
                let mut stale_skipped = 0;
                let mut sources = BTreeMap::new();

                for (pair, entry) in buffer {
                    let key = pair.key();
                    let source = entry.source.clone();
                    match cache.merge_entry(pair, entry) {
                        MergeOutcome::KeptNewer => stale_skipped += 1,
                        MergeOutcome::Inserted | MergeOutcome::Replaced => {
                            merged += 1;
                            sources.insert(key, source);
                        }
                    }
                }
                cache.touch(completed_at);
                (merged, stale_skipped, sources)
            })
            .await?;

        let summary = UpdateSummary {
            cycle_id,
            merged_pair_count: merged,
            stale_skipped,
            sources,
            errors,
            completed_at,
        };

        if summary.has_errors() {
            warn!(
                merged = summary.merged_pair_count,
                failed = summary.errors.len(),
                "Rates update completed with errors"
            );
        } else {
            info!(
                merged = summary.merged_pair_count,
                stale_skipped = summary.stale_skipped,
                "Rates update completed"
            );
        }

        Ok(summary)
    }

    /// Fetch from one client under the request timeout and validate its rates.
    async fn poll(&self, client: &dyn SourceClient) -> RatesResult<SourceResult> {
        let rates = tokio::time::timeout(self.config.request_timeout, client.fetch_rates())
            .await
            .map_err(|_| {
                RatesError::source_failure(
                    client.name(),
                    format!("no response within {:?}", self.config.request_timeout),
                )
            })??;
        let observed_at = now();

        if rates.is_empty() {
            return Err(RatesError::source_failure(client.name(), "empty result"));
        }
        for (pair, rate) in &rates {
            validate_rate(pair, *rate)
                .map_err(|e| RatesError::source_failure(client.name(), format!("malformed payload: {e}")))?;
        }

        Ok(SourceResult {
            source: client.name().to_string(),
            rates,
            observed_at,
        })
    }

    async fn record_history(&self, cycle_id: CycleId, result: &SourceResult) -> RatesResult<()> {
        let timestamp = valutatrade_common::to_rfc3339_micros(result.observed_at);
        let records = result
            .rates
            .iter()
            .map(|(pair, rate)| {
                HistoryRecord::new(pair, *rate, result.observed_at, &result.source)
                    .with_meta("client", result.source.clone())
                    .with_meta("cycle_id", cycle_id.to_string())
                    .with_meta("timestamp", timestamp.clone())
            })
            .collect();

        self.store.append_history_batch(records).await?;
        Ok(())
    }
}
