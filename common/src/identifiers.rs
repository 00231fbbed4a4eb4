//! Identifier types for rate history and update cycles.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::currency::CurrencyPair;
use crate::time::{to_rfc3339_micros, Timestamp};

/// Identifier of a single aggregation cycle.
/// Uses UUID v7 so that ids sort by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Create a new cycle ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a history record: `BASE_QUOTE_<timestamp>`.
///
/// Two observations of the same pair within one microsecond produce the same
/// base id; [`HistoryRecordId::with_suffix`] disambiguates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryRecordId(String);

impl HistoryRecordId {
    /// Derive the id for an observation of `pair` at `observed_at`.
    pub fn for_observation(pair: &CurrencyPair, observed_at: Timestamp) -> Self {
        Self(format!("{}_{}", pair.key(), to_rfc3339_micros(observed_at)))
    }

    /// The same id with a `-n` collision suffix.
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HistoryRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HistoryRecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
