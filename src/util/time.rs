//! Timestamp formatting and metadata parsing.
//!
//! All on-disk timestamps (JSONL records, metadata values) are RFC3339 with
//! nanosecond precision so that independently produced files compare bytewise.

use crate::error::{BeadsError, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp as RFC3339 with nanosecond precision.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp stored in the metadata table.
///
/// # Errors
///
/// Returns `CorruptMetadata` when the stored value does not parse; stored
/// values are never guessed at.
pub fn parse_metadata_ts(key: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| BeadsError::CorruptMetadata {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Serde adapter: `DateTime<Utc>` as RFC3339 with nanosecond precision.
pub mod rfc3339_nanos {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    /// # Errors
    ///
    /// Returns an error if the string is not valid RFC3339.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<DateTime<Utc>>` as RFC3339 with nanosecond precision.
pub mod rfc3339_nanos_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => ser.serialize_some(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            None => ser.serialize_none(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if a present string is not valid RFC3339.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_has_nine_fraction_digits() {
        let ts = Utc.timestamp_opt(1_714_557_600, 5).unwrap();
        let s = format_ts(ts);
        assert!(s.ends_with("000000005Z"), "{s}");
    }

    #[test]
    fn format_parse_roundtrip() {
        let ts = Utc.timestamp_opt(1_714_557_600, 987_654_321).unwrap();
        let parsed = parse_metadata_ts("last_import_time", &format_ts(ts)).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn corrupt_metadata_is_typed() {
        let err = parse_metadata_ts("last_import_time", "not-a-time").unwrap_err();
        match err {
            BeadsError::CorruptMetadata { key, value } => {
                assert_eq!(key, "last_import_time");
                assert_eq!(value, "not-a-time");
            }
            other => panic!("expected CorruptMetadata, got {other:?}"),
        }
    }
}
