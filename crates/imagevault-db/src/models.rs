//! Image record model and partial-update changeset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use imagevault_common::{ContainerFormat, DiskFormat, ImageId, ImageStatus};
use serde::{Deserialize, Serialize};

/// An image record tracked through the ingestion lifecycle.
///
/// `size` and `checksum` stay unset until a successful upload fills them
/// in; `location` stays unset while the record is `queued` or `saving`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub name: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub container_format: Option<ContainerFormat>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub status: ImageStatus,
    pub location: Option<String>,
    pub is_public: bool,
    pub protected: bool,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub properties: HashMap<String, String>,
}

impl ImageRecord {
    /// Create a fresh `queued` record with the given id.
    pub fn new(id: ImageId) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: None,
            disk_format: None,
            container_format: None,
            size: None,
            checksum: None,
            status: ImageStatus::Queued,
            location: None,
            is_public: false,
            protected: false,
            owner: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted: false,
            properties: HashMap::new(),
        }
    }
}

/// Partial update applied to an existing record.
///
/// `None` fields are left untouched. Status changes must go through
/// [`MetadataStore::transition`](crate::store::MetadataStore::transition)
/// so they are validated against the freshly read prior status.
#[derive(Debug, Clone, Default)]
pub struct ImageChanges {
    pub name: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub container_format: Option<ContainerFormat>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub status: Option<ImageStatus>,
    pub location: Option<String>,
    pub is_public: Option<bool>,
    pub protected: Option<bool>,
    pub owner: Option<String>,
    pub properties: Option<HashMap<String, String>>,
}

impl ImageChanges {
    /// Changeset setting only the status.
    pub fn status(status: ImageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this changeset to a record in place, bumping `updated_at`.
    ///
    /// With `purge_props` the existing property map is replaced by the
    /// supplied one (or emptied if none was supplied); otherwise supplied
    /// properties are merged over the existing map.
    pub fn apply_to(&self, record: &mut ImageRecord, purge_props: bool) {
        if let Some(ref name) = self.name {
            record.name = Some(name.clone());
        }
        if let Some(disk_format) = self.disk_format {
            record.disk_format = Some(disk_format);
        }
        if let Some(container_format) = self.container_format {
            record.container_format = Some(container_format);
        }
        if let Some(size) = self.size {
            record.size = Some(size);
        }
        if let Some(ref checksum) = self.checksum {
            record.checksum = Some(checksum.clone());
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref location) = self.location {
            record.location = Some(location.clone());
        }
        if let Some(is_public) = self.is_public {
            record.is_public = is_public;
        }
        if let Some(protected) = self.protected {
            record.protected = protected;
        }
        if let Some(ref owner) = self.owner {
            record.owner = Some(owner.clone());
        }
        if purge_props {
            record.properties = self.properties.clone().unwrap_or_default();
        } else if let Some(ref properties) = self.properties {
            record.properties.extend(
                properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        record.updated_at = Utc::now();
    }
}
