//! JSON wire helpers.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Formats a timestamp the way the stores expect (`2024-05-01T10:00:00.000Z`).
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> ProtocolResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProtocolError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Serde adapter for millisecond-precision ISO timestamps.
pub mod timestamp {
    use super::*;
    use serde::Serializer;

    /// Serializes a timestamp.
    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(at))
    }

    /// Deserializes a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}

/// Reads `null` as the type's default value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Encodes a value to JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a value from JSON bytes.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format_matches_iso_millis() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(format_timestamp(&at), "2024-05-01T10:00:00.000Z");
    }

    #[test]
    fn parse_normalizes_offsets() {
        let at = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(&at), "2024-05-01T10:00:00.000Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("soon"),
            Err(ProtocolError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn json_helpers() {
        let bytes = to_json(&vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = from_json(&bytes).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(from_json::<Vec<i32>>(b"{").is_err());
    }
}
