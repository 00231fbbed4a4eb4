//! Append-only rate observation history.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use valutatrade_common::{Currency, CurrencyPair, HistoryRecordId, Timestamp};

/// One immutable rate observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: HistoryRecordId,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub rate: f64,
    pub timestamp: Timestamp,
    pub source: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl HistoryRecord {
    /// Create a record for an observation of `pair`.
    pub fn new(
        pair: &CurrencyPair,
        rate: f64,
        timestamp: Timestamp,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: HistoryRecordId::for_observation(pair, timestamp),
            from_currency: pair.base.clone(),
            to_currency: pair.quote.clone(),
            rate,
            timestamp,
            source: source.into(),
            meta: Map::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// The pair this record observed.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from_currency.clone(), self.to_currency.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use valutatrade_common::now;

    #[test]
    fn test_record_serialises_to_history_shape() {
        let pair = CurrencyPair::from_codes("BTC", "USD").unwrap();
        let record = HistoryRecord::new(&pair, 59337.21, now(), "CoinGecko")
            .with_meta("client", "CoinGeckoClient");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["from_currency"], json!("BTC"));
        assert_eq!(value["to_currency"], json!("USD"));
        assert_eq!(value["source"], json!("CoinGecko"));
        assert_eq!(value["meta"]["client"], json!("CoinGeckoClient"));
        assert!(value["id"].as_str().unwrap().starts_with("BTC_USD_"));
        assert_eq!(record.pair(), pair);
    }

    #[test]
    fn test_record_accepts_offset_timestamps_and_missing_meta() {
        let raw = json!({
            "id": "EUR_USD_2025-10-09T12:00:00Z",
            "from_currency": "EUR",
            "to_currency": "USD",
            "rate": 1.0786,
            "timestamp": "2025-10-09T12:00:00.123456+00:00",
            "source": "ExchangeRate-API"
        });

        let record: HistoryRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.rate, 1.0786);
        assert!(record.meta.is_empty());
    }
}
