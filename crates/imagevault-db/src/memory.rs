//! In-memory metadata store.
//!
//! Backs tests and single-process deployments. The record arena is owned
//! by the store instance, so independent instances (and therefore
//! independent tests) cannot interfere with each other.

use std::collections::HashMap;

use chrono::Utc;
use imagevault_common::{Error, ImageId, ImageStatus, Result};
use parking_lot::RwLock;

use crate::filters;
use crate::models::{ImageChanges, ImageRecord};
use crate::store::{ListQuery, MetadataStore};

/// Arena-map metadata store guarded by a single RwLock.
///
/// `transition` and `soft_delete` validate the prior status under the
/// write lock, so concurrent mutations on one id serialize here.
#[derive(Default)]
pub struct MemoryMetadataStore {
    images: RwLock<HashMap<ImageId, ImageRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create(&self, record: ImageRecord) -> Result<ImageRecord> {
        let mut images = self.images.write();
        if images.contains_key(&record.id) {
            return Err(Error::duplicate(record.id.to_string()));
        }
        images.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: ImageId) -> Result<ImageRecord> {
        self.images
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("image {id}")))
    }

    fn update(
        &self,
        id: ImageId,
        changes: ImageChanges,
        purge_props: bool,
    ) -> Result<ImageRecord> {
        let mut images = self.images.write();
        let record = images
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("image {id}")))?;
        changes.apply_to(record, purge_props);
        Ok(record.clone())
    }

    fn transition(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        changes: ImageChanges,
    ) -> Result<ImageRecord> {
        let mut images = self.images.write();
        let record = images
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("image {id}")))?;
        if !from.contains(&record.status) {
            return Err(Error::conflict(format!(
                "image {id} is '{}', expected one of {:?}",
                record.status,
                from.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            )));
        }
        changes.apply_to(record, false);
        Ok(record.clone())
    }

    fn soft_delete(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        to: ImageStatus,
    ) -> Result<ImageRecord> {
        let mut images = self.images.write();
        let record = images
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("image {id}")))?;
        if !from.contains(&record.status) {
            return Err(Error::conflict(format!(
                "image {id} is '{}' and cannot be deleted",
                record.status
            )));
        }
        record.status = to;
        record.deleted = true;
        let now = Utc::now();
        record.deleted_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<ImageRecord>> {
        if let Some(marker) = query.marker {
            // Marker must resolve before it is searched for in the page.
            self.get(marker)?;
        }
        let records: Vec<ImageRecord> = self.images.read().values().cloned().collect();
        filters::apply_query(records, query)
    }
}
