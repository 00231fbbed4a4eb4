//! Rate subsystem error types.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use valutatrade_common::{CommonError, CurrencyPair};

/// A single provider failure recorded during an update cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    /// Name of the source that failed.
    pub source: String,
    /// Human-readable reason.
    pub message: String,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Errors that can occur while resolving, fetching or persisting rates.
#[derive(Debug, Error)]
pub enum RatesError {
    /// Requested currency code is not registered.
    #[error("Unknown currency '{0}'")]
    CurrencyNotFound(String),

    /// Requested currency code is malformed.
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// No source, cached entry or derived inverse could supply the rate.
    #[error("Rate not available for {0}")]
    RateUnavailable(CurrencyPair),

    /// A rate was zero, negative or not finite.
    #[error("Invalid rate {rate} for {pair}")]
    InvalidRate { pair: CurrencyPair, rate: f64 },

    /// A single external provider failed.
    #[error("Request to {provider} failed: {message}")]
    SourceFailure { provider: String, message: String },

    /// Every configured provider failed in one update cycle.
    #[error("No rates received from any source ({} failed)", errors.len())]
    AllSourcesFailed { errors: Vec<SourceError> },

    /// The cache or history file could not be durably written.
    #[error("Failed to persist {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// A persisted file exists but could not be read or parsed.
    #[error("Failed to read {}: {reason}", path.display())]
    CorruptRead { path: PathBuf, reason: String },

    /// Operation exceeded its time budget.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RatesError {
    /// Build a source failure for `provider`.
    pub fn source_failure(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RatesError::SourceFailure {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Check if the caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RatesError::RateUnavailable(_)
                | RatesError::SourceFailure { .. }
                | RatesError::AllSourcesFailed { .. }
                | RatesError::Timeout(_)
        )
    }

    /// Get error code for CLI and log output.
    pub fn error_code(&self) -> &'static str {
        match self {
            RatesError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            RatesError::InvalidCurrency(_) => "INVALID_CURRENCY",
            RatesError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            RatesError::InvalidRate { .. } => "INVALID_RATE",
            RatesError::SourceFailure { .. } => "SOURCE_FAILURE",
            RatesError::AllSourcesFailed { .. } => "ALL_SOURCES_FAILED",
            RatesError::Persistence { .. } => "PERSISTENCE_FAILURE",
            RatesError::CorruptRead { .. } => "CORRUPT_READ",
            RatesError::Timeout(_) => "TIMEOUT",
            RatesError::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<CommonError> for RatesError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::UnknownCurrency(code) => RatesError::CurrencyNotFound(code),
            other => RatesError::InvalidCurrency(other.to_string()),
        }
    }
}

/// Result type for rate operations.
pub type RatesResult<T> = Result<T, RatesError>;

/// Validate that `rate` is strictly positive and finite.
pub fn validate_rate(pair: &CurrencyPair, rate: f64) -> RatesResult<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(RatesError::InvalidRate {
            pair: pair.clone(),
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let pair = CurrencyPair::from_codes("BTC", "USD").unwrap();
        assert!(RatesError::RateUnavailable(pair).is_retryable());
        assert!(RatesError::source_failure("CoinGecko", "HTTP 503").is_retryable());
        assert!(!RatesError::Persistence {
            path: PathBuf::from("rates.json"),
            reason: "disk full".into(),
        }
        .is_retryable());
        assert!(!RatesError::CurrencyNotFound("XYZ".into()).is_retryable());
    }

    #[test]
    fn test_common_error_mapping() {
        let err: RatesError = CommonError::UnknownCurrency("XYZ".into()).into();
        assert!(matches!(err, RatesError::CurrencyNotFound(ref c) if c == "XYZ"));

        let err: RatesError = CommonError::InvalidCurrencyCode("".into()).into();
        assert_eq!(err.error_code(), "INVALID_CURRENCY");
    }

    #[test]
    fn test_validate_rate() {
        let pair = CurrencyPair::from_codes("EUR", "USD").unwrap();
        assert_eq!(validate_rate(&pair, 1.08).unwrap(), 1.08);
        assert!(validate_rate(&pair, 0.0).is_err());
        assert!(validate_rate(&pair, -1.0).is_err());
        assert!(validate_rate(&pair, f64::NAN).is_err());
        assert!(validate_rate(&pair, f64::INFINITY).is_err());
    }
}
