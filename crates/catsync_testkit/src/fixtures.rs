//! Test fixtures.
//!
//! Records and stamps that show up in most tests, pinned to a fixed
//! epoch so assertions on timestamps stay exact.

use catsync_protocol::{Record, RecordId, SyncId, SyncMetadata, SyncSource};
use chrono::{DateTime, TimeDelta, Utc};

/// Milliseconds since the Unix epoch every fixture clock starts at.
///
/// `2023-11-14T22:13:20.000Z`
pub const BASE_MILLIS: i64 = 1_700_000_000_000;

/// The fixture epoch.
pub fn base_time() -> DateTime<Utc> {
    at_millis(BASE_MILLIS)
}

/// A UTC instant from epoch milliseconds.
///
/// Panics on out-of-range input.
pub fn at_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("timestamp out of range")
}

/// The fixture epoch shifted by `ms` milliseconds.
pub fn after_base(ms: i64) -> DateTime<Utc> {
    base_time() + TimeDelta::milliseconds(ms)
}

/// A stamp written by the Target at `at`.
pub fn target_stamp(at: DateTime<Utc>) -> SyncMetadata {
    SyncMetadata::new(at, SyncSource::Target, SyncId::new("tgtstmp"))
}

/// A stamp written by the Source at `at`.
pub fn source_stamp(at: DateTime<Utc>) -> SyncMetadata {
    SyncMetadata::new(at, SyncSource::Source, SyncId::new("srcstmp"))
}

/// A plain record with a slug derived from its name.
pub fn record(id: &str, name: &str) -> Record {
    Record::new(id, name).with_slug(slugify(name))
}

/// The record used in the create round-trip scenario.
pub fn t_shirt(id: &str) -> Record {
    Record::new(id, "T-Shirt")
        .with_slug("t-shirt")
        .with_description("d")
}

/// A record already mirrored to `reference_id`, stamped by the Source.
pub fn linked(id: &str, name: &str, reference_id: &str, at: DateTime<Utc>) -> Record {
    record(id, name)
        .with_reference_id(reference_id)
        .with_metadata(source_stamp(at))
}

/// Record ids `1..=n`.
pub fn ids(n: usize) -> Vec<RecordId> {
    (1..=n).map(|i| RecordId::new(i.to_string())).collect()
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
