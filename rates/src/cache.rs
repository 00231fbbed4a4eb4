//! Typed rate cache model with TTL freshness and the recency merge rule.

use std::collections::BTreeMap;

use chrono::Duration;
use valutatrade_common::{is_fresh, Currency, CurrencyPair, Timestamp};

use crate::error::{validate_rate, RatesResult};

/// A cached rate observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RateEntry {
    /// Quote units per one base unit; always positive and finite.
    pub rate: f64,
    /// When the rate was observed.
    pub observed_at: Timestamp,
    /// Source label.
    pub source: String,
}

impl RateEntry {
    /// Create an entry, rejecting non-positive or non-finite rates.
    pub fn new(
        pair: &CurrencyPair,
        rate: f64,
        observed_at: Timestamp,
        source: impl Into<String>,
    ) -> RatesResult<Self> {
        Ok(Self {
            rate: validate_rate(pair, rate)?,
            observed_at,
            source: source.into(),
        })
    }

    /// Check if the entry is still within `ttl` at `now`.
    pub fn is_fresh(&self, ttl: Duration, now: Timestamp) -> bool {
        is_fresh(self.observed_at, ttl, now)
    }

    /// Reciprocal rate for the mirror pair. Never cached by itself.
    pub fn reverse_rate(&self) -> f64 {
        1.0 / self.rate
    }

    /// Whether `candidate` may replace this entry.
    ///
    /// Ties favour the candidate; only a strictly newer existing entry wins.
    pub fn is_superseded_by(&self, candidate: &RateEntry) -> bool {
        self.observed_at <= candidate.observed_at
    }
}

/// Outcome of merging one entry into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    /// The cached entry was strictly newer and was kept.
    KeptNewer,
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, MergeOutcome::KeptNewer)
    }
}

/// In-memory view of the persisted rate cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateCache {
    pairs: BTreeMap<CurrencyPair, RateEntry>,
    last_refresh: Option<Timestamp>,
}

impl RateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from already-validated parts.
    pub fn from_parts(
        pairs: BTreeMap<CurrencyPair, RateEntry>,
        last_refresh: Option<Timestamp>,
    ) -> Self {
        Self {
            pairs,
            last_refresh,
        }
    }

    /// Get the entry for a pair regardless of age.
    pub fn get(&self, pair: &CurrencyPair) -> Option<&RateEntry> {
        self.pairs.get(pair)
    }

    /// Get the entry for a pair only if it is within `ttl` at `now`.
    pub fn fresh_entry(
        &self,
        pair: &CurrencyPair,
        ttl: Duration,
        now: Timestamp,
    ) -> Option<&RateEntry> {
        self.pairs.get(pair).filter(|entry| entry.is_fresh(ttl, now))
    }

    /// Merge an entry using the recency rule.
    pub fn merge_entry(&mut self, pair: CurrencyPair, entry: RateEntry) -> MergeOutcome {
        match self.pairs.get_mut(&pair) {
            None => {
                self.pairs.insert(pair, entry);
                MergeOutcome::Inserted
            }
            Some(existing) if existing.is_superseded_by(&entry) => {
                *existing = entry;
                MergeOutcome::Replaced
            }
            Some(_) => MergeOutcome::KeptNewer,
        }
    }

    /// Record a successful write to the structure as a whole.
    pub fn touch(&mut self, at: Timestamp) {
        self.last_refresh = Some(at);
    }

    pub fn last_refresh(&self) -> Option<Timestamp> {
        self.last_refresh
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyPair, &RateEntry)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Select entries for presentation.
    pub fn query(&self, filter: &CacheQuery) -> Vec<(&CurrencyPair, &RateEntry)> {
        let mut selected: Vec<_> = self
            .pairs
            .iter()
            .filter(|(pair, _)| filter.base.as_ref().map_or(true, |c| &pair.base == c))
            .filter(|(pair, _)| filter.quote.as_ref().map_or(true, |c| &pair.quote == c))
            .collect();

        if let Some(top) = filter.top {
            selected.sort_by(|a, b| b.1.rate.total_cmp(&a.1.rate));
            selected.truncate(top);
        }

        selected
    }
}

/// Read-side filter over cached rates.
#[derive(Debug, Clone, Default)]
pub struct CacheQuery {
    /// Only pairs with this base currency.
    pub base: Option<Currency>,
    /// Only pairs with this quote currency.
    pub quote: Option<Currency>,
    /// Keep the N highest rates, ordered by rate descending.
    /// Without it, results are ordered by pair-key.
    pub top: Option<usize>,
}
