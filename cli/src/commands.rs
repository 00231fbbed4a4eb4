//! Command implementations.
//!
//! Each command writes its report to `out` and returns a [`CommandStatus`];
//! unexpected failures (persistence, bad configuration) propagate as errors.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::debug;
use valutatrade_common::{Currency, CurrencyKind, CurrencyRegistry, Timestamp};
use valutatrade_rates::{
    build_clients, AggregatorConfig, CacheQuery, ClientRateSource, RateAggregator, RateCacheStore,
    RateResolver, RateSource, RatesConfig, RatesError, ResolvedRate, ResolverConfig,
    ResolverSourceKind, SourceKind, StubRates,
};

/// Outcome reported through the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failed,
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Success => ExitCode::SUCCESS,
            CommandStatus::Failed => ExitCode::FAILURE,
        }
    }
}

/// Run one aggregation cycle over the configured sources, or only `source`.
pub async fn update_rates(
    config: &RatesConfig,
    source: Option<&str>,
    out: &mut dyn Write,
) -> anyhow::Result<CommandStatus> {
    let kinds = match source {
        Some(name) => vec![SourceKind::parse(name)?],
        None => config.sources.clone(),
    };

    let clients = build_clients(config, &kinds)?;
    let store = Arc::new(RateCacheStore::from_config(config));
    let aggregator = RateAggregator::new(clients, store.clone(), AggregatorConfig::from(config));
    debug!(sources = ?aggregator.source_names(), "Running update");

    match aggregator.run_update().await {
        Ok(summary) => {
            let mut per_source: BTreeMap<&str, usize> = BTreeMap::new();
            for name in summary.sources.values() {
                *per_source.entry(name.as_str()).or_default() += 1;
            }
            for (name, count) in &per_source {
                writeln!(out, "INFO: Fetching from {name}... OK ({count} rates)")?;
            }
            for error in &summary.errors {
                writeln!(out, "ERROR: Fetching from {}... FAILED ({})", error.source, error.message)?;
            }
            writeln!(
                out,
                "INFO: Writing {} rates to {}...",
                summary.merged_pair_count,
                store.rates_path().display()
            )?;
            if summary.stale_skipped > 0 {
                writeln!(
                    out,
                    "INFO: Kept {} cached rates that were newer than this update",
                    summary.stale_skipped
                )?;
            }

            let last_refresh = format_timestamp(summary.completed_at);
            if summary.has_errors() {
                writeln!(
                    out,
                    "Update completed with errors. Total rates updated: {}. Last refresh: {last_refresh}",
                    summary.merged_pair_count
                )?;
                Ok(CommandStatus::Failed)
            } else {
                writeln!(
                    out,
                    "Update successful. Total rates updated: {}. Last refresh: {last_refresh}",
                    summary.merged_pair_count
                )?;
                Ok(CommandStatus::Success)
            }
        }
        Err(RatesError::AllSourcesFailed { errors }) => {
            for error in &errors {
                writeln!(out, "ERROR: Fetching from {}... FAILED ({})", error.source, error.message)?;
            }
            writeln!(out, "Update failed: no rates received, cache left unchanged.")?;
            Ok(CommandStatus::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

/// Print cached rates, optionally filtered by base (`currency`) and quote (`base`).
pub async fn show_rates(
    config: &RatesConfig,
    currency: Option<&str>,
    base: Option<&str>,
    top: Option<usize>,
    out: &mut dyn Write,
) -> anyhow::Result<CommandStatus> {
    let store = RateCacheStore::from_config(config);
    let cache = store.load().await;

    if cache.is_empty() {
        writeln!(out, "Local rate cache is empty. Run 'update-rates' to load data.")?;
        return Ok(CommandStatus::Failed);
    }

    let query = CacheQuery {
        base: currency.map(Currency::new).transpose()?,
        quote: base.map(Currency::new).transpose()?,
        top,
    };
    let selected = cache.query(&query);

    if let (Some(code), true) = (&query.base, selected.is_empty()) {
        writeln!(out, "No cached rate for '{code}'.")?;
        return Ok(CommandStatus::Failed);
    }

    let updated_at = cache
        .last_refresh()
        .map(format_timestamp)
        .unwrap_or_else(|| "unknown".to_string());
    writeln!(out, "Rates from cache (updated at {updated_at}):")?;

    if selected.is_empty() {
        writeln!(out, "No rates match the given filters.")?;
        return Ok(CommandStatus::Success);
    }

    let registry = CurrencyRegistry::default();
    for (pair, entry) in selected {
        let decimals = if is_crypto(&registry, &pair.base) { 2 } else { 5 };
        writeln!(out, "- {}: {:.*}", pair.key(), decimals, entry.rate)?;
    }

    Ok(CommandStatus::Success)
}

/// Resolve and print one rate with its reverse.
pub async fn get_rate(
    config: &RatesConfig,
    from: &str,
    to: &str,
    out: &mut dyn Write,
) -> anyhow::Result<CommandStatus> {
    let store = Arc::new(RateCacheStore::from_config(config));
    let resolver = RateResolver::new(store, resolver_source(config)?, ResolverConfig::from(config));

    match resolver.resolve(from, to).await {
        Ok(resolved) => {
            write_resolved(resolver.registry(), &resolved, out)?;
            Ok(CommandStatus::Success)
        }
        Err(e @ (RatesError::CurrencyNotFound(_) | RatesError::InvalidCurrency(_))) => {
            writeln!(out, "Error: {e}")?;
            writeln!(
                out,
                "Supported currencies: {}",
                resolver.registry().codes().join(", ")
            )?;
            Ok(CommandStatus::Failed)
        }
        Err(e) if e.is_retryable() => {
            writeln!(out, "Error: {e}")?;
            writeln!(out, "The rate service may be temporarily unavailable. Retry later or run 'update-rates'.")?;
            Ok(CommandStatus::Failed)
        }
        Err(e) => Err(e.into()),
    }
}

fn resolver_source(config: &RatesConfig) -> anyhow::Result<Arc<dyn RateSource>> {
    Ok(match config.resolver_source {
        ResolverSourceKind::Stub => Arc::new(StubRates::new()),
        ResolverSourceKind::Live => {
            Arc::new(ClientRateSource::new(build_clients(config, &config.sources)?))
        }
    })
}

fn write_resolved(
    registry: &CurrencyRegistry,
    resolved: &ResolvedRate,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    let pair = &resolved.pair;
    let decimals = if is_crypto(registry, &pair.quote) { 8 } else { 5 };
    let reverse = resolved.reverse_rate();
    let reverse_decimals = if reverse < 0.01 { 8 } else { 2 };

    writeln!(
        out,
        "Rate {}→{}: {:.*} (updated: {}, source: {})",
        pair.base,
        pair.quote,
        decimals,
        resolved.rate,
        resolved.observed_at.format("%Y-%m-%d %H:%M:%S"),
        resolved.source
    )?;
    writeln!(
        out,
        "  Reverse rate {}→{}: {:.*}",
        pair.quote, pair.base, reverse_decimals, reverse
    )
}

fn is_crypto(registry: &CurrencyRegistry, currency: &Currency) -> bool {
    registry
        .get(currency.code())
        .map(|info| info.kind == CurrencyKind::Crypto)
        .unwrap_or(false)
}

fn format_timestamp(timestamp: Timestamp) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
}
