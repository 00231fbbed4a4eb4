//! Error types for shared ValutaTrade value types.

use thiserror::Error;

/// Errors produced while building currencies and pairs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// The code is empty or contains characters other than ASCII letters and digits.
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrencyCode(String),

    /// The code is well formed but not present in the registry.
    #[error("Unknown currency '{0}'")]
    UnknownCurrency(String),

    /// A pair-key is not of the form `BASE_QUOTE`.
    #[error("Invalid pair key: '{0}'")]
    InvalidPairKey(String),
}

impl CommonError {
    /// Get error code for CLI and log output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CommonError::InvalidCurrencyCode(_) => "INVALID_CURRENCY_CODE",
            CommonError::UnknownCurrency(_) => "CURRENCY_NOT_FOUND",
            CommonError::InvalidPairKey(_) => "INVALID_PAIR_KEY",
        }
    }
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;
