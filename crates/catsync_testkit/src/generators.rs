//! Property-based test generators using proptest.

use crate::fixtures::BASE_MILLIS;
use catsync_protocol::{
    EventName, Operation, Record, RecordId, RecordPatch, SyncId, SyncMetadata, SyncSource,
};
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for record ids, numeric or textual like the Source hands out.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    prop_oneof![
        (1u32..100_000).prop_map(|n| RecordId::new(n.to_string())),
        prop::string::string_regex("[a-z0-9]{4,12}")
            .expect("Invalid regex")
            .prop_map(RecordId::new),
    ]
}

/// Strategy for resource (collection) names.
pub fn resource_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop::sample::select(Operation::ALL.to_vec())
}

/// Strategy for well-formed event names.
pub fn event_name_strategy() -> impl Strategy<Value = EventName> {
    (resource_strategy(), operation_strategy())
        .prop_map(|(resource, operation)| EventName::new(resource, operation))
}

/// Strategy for sync sources.
pub fn sync_source_strategy() -> impl Strategy<Value = SyncSource> {
    prop_oneof![Just(SyncSource::Source), Just(SyncSource::Target)]
}

/// Strategy for instants within a day of the fixture epoch, at millisecond precision.
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (-86_400_000i64..86_400_000).prop_map(|offset| {
        DateTime::from_timestamp_millis(BASE_MILLIS + offset).expect("timestamp out of range")
    })
}

/// Strategy for complete stamps.
pub fn sync_metadata_strategy() -> impl Strategy<Value = SyncMetadata> {
    (
        instant_strategy(),
        sync_source_strategy(),
        prop::string::string_regex("[0-9a-z]{7}").expect("Invalid regex"),
    )
        .prop_map(|(at, source, id)| SyncMetadata::new(at, source, SyncId::new(id)))
}

/// Strategy for stored metadata values that do not hold a complete stamp.
pub fn incomplete_metadata_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        Just(json!({})),
        Just(json!("")),
        Just(json!("{}")),
        Just(json!({ "syncSource": "target" })),
        Just(json!({ "lastSyncedAt": "2024-01-01T00:00:00.000Z" })),
        Just(json!({ "lastSyncedAt": "yesterday", "syncSource": "target", "syncId": "x" })),
        any::<i64>().prop_map(Value::from),
    ]
}

/// Strategy for patches.
pub fn patch_strategy() -> impl Strategy<Value = RecordPatch> {
    (
        prop::option::of("[A-Za-z ]{1,24}"),
        prop::option::of("[A-Za-z ]{0,48}"),
        prop::option::of("[a-z-]{1,24}"),
        prop::option::of(0.0f64..10_000.0),
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(name, description, slug, price, is_available)| RecordPatch {
            name,
            description,
            slug,
            price,
            is_available,
            ..RecordPatch::default()
        })
}

/// Strategy for records, with or without a stamp.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        record_id_strategy(),
        "[A-Za-z ]{1,24}",
        "[a-z-]{1,24}",
        prop::option::of(sync_metadata_strategy()),
    )
        .prop_map(|(id, name, slug, metadata)| {
            let record = Record::new(id, name).with_slug(slug);
            match metadata {
                Some(metadata) => record.with_metadata(metadata),
                None => record,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn event_names_parse_back(name in event_name_strategy()) {
            let parsed: EventName = name.to_string().parse().unwrap();
            prop_assert_eq!(parsed, name);
        }

        #[test]
        fn generated_stamps_are_millisecond_precise(meta in sync_metadata_strategy()) {
            prop_assert_eq!(meta.last_synced_at.timestamp_subsec_nanos() % 1_000_000, 0);
        }
    }
}
