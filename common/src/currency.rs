//! Currency codes, currency pairs and the currency registry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Separator between the base and quote codes of a pair-key.
pub const PAIR_KEY_SEPARATOR: char = '_';

/// Upper-cased currency code (ISO 4217 for fiat, ticker for crypto).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a code, normalising whitespace and case.
    pub fn new(code: impl AsRef<str>) -> Result<Self, CommonError> {
        let code = code.as_ref().trim().to_uppercase();
        if code.is_empty() {
            return Err(CommonError::InvalidCurrencyCode(code));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CommonError::InvalidCurrencyCode(code));
        }
        Ok(Self(code))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    pub fn btc() -> Self {
        Self("BTC".to_string())
    }

    pub fn eth() -> Self {
        Self("ETH".to_string())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// A directional currency pair. `BTC/USD` and `USD/BTC` are distinct pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyPair {
    /// Base currency (the unit being priced).
    pub base: Currency,
    /// Quote currency (the pricing unit).
    pub quote: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    /// Build a pair from two raw codes.
    pub fn from_codes(base: &str, quote: &str) -> Result<Self, CommonError> {
        Ok(Self::new(Currency::new(base)?, Currency::new(quote)?))
    }

    /// Parse a `BASE_QUOTE` pair-key.
    pub fn from_key(key: &str) -> Result<Self, CommonError> {
        let (base, quote) = key
            .split_once(PAIR_KEY_SEPARATOR)
            .ok_or_else(|| CommonError::InvalidPairKey(key.to_string()))?;
        Self::from_codes(base, quote).map_err(|_| CommonError::InvalidPairKey(key.to_string()))
    }

    /// The `BASE_QUOTE` identity key of this pair.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.base, PAIR_KEY_SEPARATOR, self.quote)
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Whether base and quote are the same currency.
    pub fn is_identity(&self) -> bool {
        self.base == self.quote
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for CurrencyPair {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

/// Fiat or crypto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyKind {
    Fiat,
    Crypto,
}

/// Descriptive information about a registered currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyInfo {
    pub currency: Currency,
    pub name: String,
    pub kind: CurrencyKind,
}

/// The set of currencies the wallet can hold and quote.
///
/// Lookups normalise the requested code, so `" btc "` resolves to `BTC`.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: BTreeMap<Currency, CurrencyInfo>,
}

impl CurrencyRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            currencies: BTreeMap::new(),
        }
    }

    /// Register a currency, replacing any previous registration of the same code.
    pub fn register(
        &mut self,
        code: &str,
        name: impl Into<String>,
        kind: CurrencyKind,
    ) -> Result<(), CommonError> {
        let currency = Currency::new(code)?;
        self.currencies.insert(
            currency.clone(),
            CurrencyInfo {
                currency,
                name: name.into(),
                kind,
            },
        );
        Ok(())
    }

    /// Builder-style registration for static tables.
    pub fn with(mut self, code: &str, name: &str, kind: CurrencyKind) -> Self {
        if let Err(e) = self.register(code, name, kind) {
            debug_assert!(false, "invalid builtin currency code: {e}");
        }
        self
    }

    /// Look up a currency by code.
    pub fn get(&self, code: &str) -> Result<&CurrencyInfo, CommonError> {
        let currency = Currency::new(code)
            .map_err(|_| CommonError::UnknownCurrency(code.trim().to_uppercase()))?;
        self.currencies
            .get(&currency)
            .ok_or_else(|| CommonError::UnknownCurrency(currency.code().to_string()))
    }

    /// Resolve a code to a registered [`Currency`].
    pub fn currency(&self, code: &str) -> Result<Currency, CommonError> {
        self.get(code).map(|info| info.currency.clone())
    }

    /// Check if a code is registered.
    pub fn contains(&self, currency: &Currency) -> bool {
        self.currencies.contains_key(currency)
    }

    /// All registered codes in alphabetical order.
    pub fn codes(&self) -> Vec<&str> {
        self.currencies.keys().map(|c| c.code()).collect()
    }

    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::empty()
            .with("USD", "US Dollar", CurrencyKind::Fiat)
            .with("EUR", "Euro", CurrencyKind::Fiat)
            .with("GBP", "British Pound", CurrencyKind::Fiat)
            .with("RUB", "Russian Ruble", CurrencyKind::Fiat)
            .with("BTC", "Bitcoin", CurrencyKind::Crypto)
            .with("ETH", "Ethereum", CurrencyKind::Crypto)
            .with("SOL", "Solana", CurrencyKind::Crypto)
    }
}
