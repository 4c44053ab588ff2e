//! Target-side product payloads.

use crate::ids::ReferenceId;
use crate::metadata::SyncMetadata;
use crate::record::Record;
use serde::{Deserialize, Serialize};

/// A product option as the Target models it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    /// Option title.
    pub title: String,
    /// Allowed values.
    pub values: Vec<String>,
}

impl ProductOption {
    /// Creates an option.
    pub fn new(title: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            title: title.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The option set attached to every newly mirrored product.
    ///
    /// The Target refuses products without at least one option.
    pub fn default_set() -> Vec<ProductOption> {
        vec![ProductOption::new(
            "Default Option",
            ["opt 1", "opt 2", "opt 3"],
        )]
    }
}

/// Payload for creating a product in the Target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProduct {
    /// Product title.
    pub title: String,
    /// Product description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// URL handle.
    pub handle: String,
    /// Option set.
    pub options: Vec<ProductOption>,
    /// Provenance of this write.
    pub metadata: SyncMetadata,
}

impl CreateProduct {
    /// Maps a Source record onto a create payload.
    pub fn from_record(record: &Record, options: Vec<ProductOption>, metadata: SyncMetadata) -> Self {
        Self {
            title: record.name.clone(),
            description: record.description.clone(),
            handle: record.slug.clone(),
            options,
            metadata,
        }
    }
}

/// Payload for updating a product in the Target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProduct {
    /// Product title.
    pub title: String,
    /// Product description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// URL handle.
    pub handle: String,
    /// Provenance of this write.
    pub metadata: SyncMetadata,
}

impl UpdateProduct {
    /// Maps a Source record onto an update payload.
    pub fn from_record(record: &Record, metadata: SyncMetadata) -> Self {
        Self {
            title: record.name.clone(),
            description: record.description.clone(),
            handle: record.slug.clone(),
            metadata,
        }
    }
}

/// What the Target returns after a create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedProduct {
    /// Id assigned by the Target.
    pub id: ReferenceId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SyncId;
    use crate::metadata::SyncSource;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn stamp() -> SyncMetadata {
        SyncMetadata::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            SyncSource::Source,
            SyncId::new("abc"),
        )
    }

    #[test]
    fn create_payload_maps_fields() {
        let record = Record::new("1", "T-Shirt")
            .with_slug("t-shirt")
            .with_description("d");
        let payload = CreateProduct::from_record(&record, ProductOption::default_set(), stamp());

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "title": "T-Shirt",
                "description": "d",
                "handle": "t-shirt",
                "options": [{ "title": "Default Option", "values": ["opt 1", "opt 2", "opt 3"] }],
                "metadata": {
                    "lastSyncedAt": "2024-05-01T10:00:00.000Z",
                    "syncSource": "source",
                    "syncId": "abc",
                },
            })
        );
    }

    #[test]
    fn update_payload_has_no_options() {
        let record = Record::new("1", "Mug").with_slug("mug");
        let value = serde_json::to_value(UpdateProduct::from_record(&record, stamp())).unwrap();
        assert!(value.get("options").is_none());
        assert!(value.get("description").is_none());
        assert_eq!(value["handle"], "mug");
    }
}
