//! # Timestamps
//!
//! The one time type that crosses the storage and wire boundaries.
//!
//! ## Normalization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  What arrives                          What we keep                     │
//! │  ─────────────────────────────────     ──────────────────────────────   │
//! │  2026-03-01T09:15:00.123Z              2026-03-01T09:15:00.123Z         │
//! │  2026-03-01T10:15:00.123456+01:00      2026-03-01T09:15:00.123Z         │
//! │  2026-03-01 09:15:00      (SQLite)     2026-03-01T09:15:00.000Z         │
//! │  2026-03-01 09:15:00.5    (SQLite)     2026-03-01T09:15:00.500Z         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is UTC and truncated to milliseconds, so a value written to
//! SQLite and read back compares equal to the original, and text columns sort
//! chronologically.

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ValidationError;

/// A UTC instant with millisecond precision.
/// Exposed to TypeScript as `string` through `#[ts(as = "String")]` on the
/// fields that carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Wraps a chrono value, truncating sub-millisecond precision.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let millis = dt.timestamp_millis();
        // Millisecond round trip of a valid DateTime is always representable.
        Timestamp(Utc.timestamp_millis_opt(millis).single().unwrap_or(dt))
    }

    /// Builds a timestamp from Unix milliseconds.
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Timestamp)
    }

    /// Parses any of the accepted textual forms.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }

        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Ok(Self::from_datetime(naive.and_utc()));
            }
        }

        Err(ValidationError::InvalidFormat {
            field: "timestamp".to_string(),
            reason: format!("unrecognized timestamp '{}'", raw),
        })
    }

    /// Canonical storage form: `2026-03-01T09:15:00.123Z`.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    #[inline]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    #[inline]
    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns the instant `days` days before this one.
    pub fn minus_days(&self, days: i64) -> Self {
        Timestamp(self.0 - Duration::days(days))
    }

    /// Returns the instant `millis` milliseconds after this one.
    pub fn plus_millis(&self, millis: i64) -> Self {
        Timestamp(self.0 + Duration::milliseconds(millis))
    }

    /// `YYYY-MM-DD HH:MM` for receipt headers.
    pub fn receipt_format(&self) -> String {
        self.0.format("%Y-%m-%d %H:%M").to_string()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::from_datetime(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_normalizes_to_utc_millis() {
        let ts = Timestamp::parse("2026-03-01T10:15:00.123456+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T09:15:00.123Z");
    }

    #[test]
    fn test_parse_sqlite_forms() {
        let plain = Timestamp::parse("2026-03-01 09:15:00").unwrap();
        assert_eq!(plain.to_rfc3339(), "2026-03-01T09:15:00.000Z");

        let fractional = Timestamp::parse("2026-03-01 09:15:00.5").unwrap();
        assert_eq!(fractional.to_rfc3339(), "2026-03-01T09:15:00.500Z");
    }

    #[test]
    fn test_round_trip_is_identity() {
        let original = Timestamp::from_millis(1_772_356_500_123).unwrap();
        let reparsed = Timestamp::parse(&original.to_rfc3339()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ts = Timestamp::from_millis(0).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:00.000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_minus_days_orders_correctly() {
        let now = Timestamp::parse("2026-03-10T00:00:00Z").unwrap();
        let cutoff = now.minus_days(7);
        assert!(cutoff < now);
        assert_eq!(cutoff.to_rfc3339(), "2026-03-03T00:00:00.000Z");
    }
}
