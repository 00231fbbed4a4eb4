//! ValutaTrade Rates
//!
//! Exchange-rate resolution and caching for the ValutaTrade wallet.
//!
//! # Features
//!
//! - File-backed rate cache with TTL freshness and crash-safe writes
//! - On-demand resolution with inverse-pair fallback
//! - Multi-source update cycles with last-source-wins merging
//! - Append-only observation history
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use valutatrade_rates::{RateCacheStore, RateResolver, ResolverConfig, StubRates};
//!
//! let store = Arc::new(RateCacheStore::new("data/rates.json", "data/exchange_rates.json"));
//! let resolver = RateResolver::new(store, Arc::new(StubRates::new()), ResolverConfig::default());
//!
//! let resolved = resolver.resolve("BTC", "USD").await?;
//! println!("{} = {}", resolved.pair, resolved.rate);
//! ```

pub mod aggregator;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod history;
pub mod resolver;
pub mod source;
pub mod store;

pub use aggregator::{AggregatorConfig, RateAggregator, UpdateSummary};
pub use cache::{CacheQuery, MergeOutcome, RateCache, RateEntry};
pub use clients::{build_clients, CoinGeckoClient, ExchangeRateApiClient};
pub use config::{RatesConfig, ResolverSourceKind, SourceKind};
pub use error::{RatesError, RatesResult, SourceError};
pub use history::HistoryRecord;
pub use resolver::{RateOrigin, RateResolver, ResolvedRate, ResolverConfig};
pub use source::{ClientRateSource, FetchedRates, Quote, RateSource, SourceClient, StubRates};
pub use store::RateCacheStore;

#[cfg(any(test, feature = "test-utils"))]
pub use source::{MockRateSource, MockSourceClient};
