//! Time utilities for rate freshness.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Default freshness window for cached rates (300 seconds).
pub fn default_rates_ttl() -> Duration {
    Duration::seconds(300)
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Age of `timestamp` relative to `at`. Negative when `timestamp` lies in the future.
pub fn age(timestamp: Timestamp, at: Timestamp) -> Duration {
    at.signed_duration_since(timestamp)
}

/// Check if `observed_at` is still within `ttl` at `at`.
///
/// The window is half-open: an observation exactly `ttl` old is stale.
pub fn is_fresh(observed_at: Timestamp, ttl: Duration, at: Timestamp) -> bool {
    age(observed_at, at) < ttl
}

/// RFC 3339 rendering with microsecond precision and a `Z` suffix.
pub fn to_rfc3339_micros(timestamp: Timestamp) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a whole number of seconds to a chrono duration, saturating on overflow.
pub fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_fresh() {
        let at = now();
        let ttl = Duration::seconds(300);

        assert!(is_fresh(at - Duration::seconds(10), ttl, at));
        assert!(!is_fresh(at - Duration::seconds(300), ttl, at));
        assert!(!is_fresh(at - Duration::minutes(10), ttl, at));
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let at = now();
        assert!(!is_fresh(at, Duration::zero(), at));
    }

    #[test]
    fn test_rfc3339_micros() {
        let ts = DateTime::parse_from_rfc3339("2025-01-02T03:04:05.123456789+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(to_rfc3339_micros(ts), "2025-01-02T03:04:05.123456Z");
    }

    #[test]
    fn test_seconds_saturates() {
        assert_eq!(seconds(300), Duration::seconds(300));
        assert_eq!(seconds(u64::MAX), Duration::MAX);
    }
}
