//! Provenance stamps.
//!
//! Every mirrored write leaves a [`SyncMetadata`] on the Source record. The
//! stamp names the system whose write produced it, which is what lets the
//! echo guard tell a genuine edit apart from the side effect of a mirror.

use crate::ids::SyncId;
use crate::wire;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The system whose write produced a stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncSource {
    /// The system emitting lifecycle events.
    #[serde(rename = "source", alias = "directus")]
    Source,
    /// The mirrored system.
    #[serde(rename = "target", alias = "medusa")]
    Target,
}

impl SyncSource {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Source => "source",
            SyncSource::Target => "target",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "source" | "directus" => Some(SyncSource::Source),
            "target" | "medusa" => Some(SyncSource::Target),
            _ => None,
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance stamp attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// When the mirrored write happened.
    #[serde(rename = "lastSyncedAt", with = "wire::timestamp")]
    pub last_synced_at: DateTime<Utc>,
    /// Which system produced the write.
    #[serde(rename = "syncSource")]
    pub sync_source: SyncSource,
    /// Token of the write.
    #[serde(rename = "syncId")]
    pub sync_id: SyncId,
}

impl SyncMetadata {
    /// Creates a stamp from its parts.
    pub fn new(last_synced_at: DateTime<Utc>, sync_source: SyncSource, sync_id: SyncId) -> Self {
        Self {
            last_synced_at: last_synced_at.trunc_subsecs(3),
            sync_source,
            sync_id,
        }
    }

    /// Produces the next stamp for a record.
    ///
    /// `lastSyncedAt` never moves backwards: if the clock is behind the
    /// previous stamp, the previous time is reused.
    pub fn stamp(source: SyncSource, now: DateTime<Utc>, previous: Option<&SyncMetadata>) -> Self {
        let now = now.trunc_subsecs(3);
        let last_synced_at = match previous {
            Some(prev) if prev.last_synced_at > now => prev.last_synced_at,
            _ => now,
        };
        Self {
            last_synced_at,
            sync_source: source,
            sync_id: SyncId::generate(),
        }
    }

    /// Reads a stamp from a stored metadata value.
    ///
    /// Accepts the same shapes as a `Record`'s metadata column and returns
    /// `None` for anything short of a complete stamp.
    pub fn from_stored(value: &Value) -> Option<Self> {
        from_value(value)
    }

    /// Time elapsed between the stamp and `now`. Negative if the stamp is in the future.
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_synced_at
    }
}

/// Reads a stored metadata column.
///
/// Source stores keep this as free-form JSON: it may be `null`, `{}`, a
/// partially filled object, or a JSON document stored as a string. Anything
/// short of a complete stamp reads as "never synced".
pub(crate) fn lenient<'de, D>(deserializer: D) -> Result<Option<SyncMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| from_value(&v)))
}

fn from_value(value: &Value) -> Option<SyncMetadata> {
    match value {
        Value::Object(map) => {
            let at = map.get("lastSyncedAt")?.as_str()?;
            let source = SyncSource::parse(map.get("syncSource")?.as_str()?)?;
            let sync_id = map.get("syncId")?.as_str()?;
            let at = wire::parse_timestamp(at).ok()?;
            Some(SyncMetadata {
                last_synced_at: at,
                sync_source: source,
                sync_id: SyncId::new(sync_id),
            })
        }
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| from_value(&v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn wire_shape() {
        let meta = SyncMetadata::new(at(1_700_000_000_123), SyncSource::Source, SyncId::new("abc1234"));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            value,
            json!({
                "lastSyncedAt": "2023-11-14T22:13:20.123Z",
                "syncSource": "source",
                "syncId": "abc1234",
            })
        );
    }

    #[test]
    fn legacy_source_names() {
        let meta: SyncMetadata = serde_json::from_value(json!({
            "lastSyncedAt": "2024-05-01T10:00:00.000Z",
            "syncSource": "medusa",
            "syncId": "x",
        }))
        .unwrap();
        assert_eq!(meta.sync_source, SyncSource::Target);
    }

    #[test]
    fn lenient_reads_incomplete_as_none() {
        assert!(from_value(&json!({})).is_none());
        assert!(from_value(&json!(null)).is_none());
        assert!(from_value(&json!({ "syncSource": "target", "syncId": "a" })).is_none());
        assert!(from_value(&json!({
            "lastSyncedAt": "not a date",
            "syncSource": "target",
            "syncId": "a",
        }))
        .is_none());
    }

    #[test]
    fn lenient_reads_stringified_json() {
        let text = r#"{"lastSyncedAt":"2024-05-01T10:00:00.000Z","syncSource":"target","syncId":"a"}"#;
        let meta = from_value(&Value::String(text.into())).unwrap();
        assert_eq!(meta.sync_source, SyncSource::Target);
    }

    #[test]
    fn stamp_never_moves_backwards() {
        let prev = SyncMetadata::new(at(10_000), SyncSource::Target, SyncId::new("p"));
        let next = SyncMetadata::stamp(SyncSource::Source, at(5_000), Some(&prev));
        assert_eq!(next.last_synced_at, at(10_000));
        assert_eq!(next.sync_source, SyncSource::Source);

        let later = SyncMetadata::stamp(SyncSource::Source, at(20_000), Some(&prev));
        assert_eq!(later.last_synced_at, at(20_000));
    }

    #[test]
    fn elapsed_is_signed() {
        let meta = SyncMetadata::new(at(10_000), SyncSource::Target, SyncId::new("p"));
        assert_eq!(meta.elapsed(at(12_500)), TimeDelta::milliseconds(2_500));
        assert_eq!(meta.elapsed(at(9_000)), TimeDelta::milliseconds(-1_000));
    }
}
