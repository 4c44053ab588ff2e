//! Source-side catalog records.

use crate::ids::{RecordId, ReferenceId};
use crate::metadata::{self, SyncMetadata};
use crate::wire::null_as_default;
use serde::{Deserialize, Serialize};

/// A catalog entity owned by the Source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source-side key.
    pub id: RecordId,
    /// Display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Long description.
    #[serde(default)]
    pub description: Option<String>,
    /// URL handle.
    #[serde(default, deserialize_with = "null_as_default")]
    pub slug: String,
    /// Price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Category label.
    #[serde(default)]
    pub category: Option<String>,
    /// Availability flag.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_available: bool,
    /// Stock keeping unit.
    #[serde(default)]
    pub sku: Option<String>,
    /// Last update time as reported by the Source.
    #[serde(default)]
    pub date_updated: Option<String>,
    /// Id of the mirrored entity in the Target.
    #[serde(default, alias = "medusa_reference_id")]
    pub reference_id: Option<ReferenceId>,
    /// Provenance of the last mirrored write.
    #[serde(
        default,
        deserialize_with = "metadata::lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<SyncMetadata>,
}

impl Record {
    /// Creates a record with only an id and a name.
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            slug: String::new(),
            price: None,
            category: None,
            is_available: false,
            sku: None,
            date_updated: None,
            reference_id: None,
            metadata: None,
        }
    }

    /// Sets the slug.
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the reference id.
    pub fn with_reference_id(mut self, reference_id: impl Into<ReferenceId>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Sets the provenance stamp.
    pub fn with_metadata(mut self, metadata: SyncMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns true once the record has been mirrored at least once.
    pub fn is_linked(&self) -> bool {
        self.reference_id.is_some()
    }
}

/// A pending set of field changes, as seen by filter handlers.
///
/// Absent fields are left untouched when the patch is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// New price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// New category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// New availability flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
    /// New SKU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl RecordPatch {
    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch onto a record.
    pub fn apply_to(&self, record: &mut Record) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(description) = &self.description {
            record.description = Some(description.clone());
        }
        if let Some(slug) = &self.slug {
            record.slug = slug.clone();
        }
        if let Some(price) = self.price {
            record.price = Some(price);
        }
        if let Some(category) = &self.category {
            record.category = Some(category.clone());
        }
        if let Some(is_available) = self.is_available {
            record.is_available = is_available;
        }
        if let Some(sku) = &self.sku {
            record.sku = Some(sku.clone());
        }
    }

    /// Builds a new record from the patch.
    pub fn into_record(self, id: impl Into<RecordId>) -> Record {
        let mut record = Record::new(id, String::new());
        self.apply_to(&mut record);
        record
    }
}
