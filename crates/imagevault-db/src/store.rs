//! The metadata store contract.
//!
//! Every mutating status change goes through [`MetadataStore::transition`]
//! or [`MetadataStore::soft_delete`], which re-validate the record's
//! freshly read status inside the store's critical section. Two concurrent
//! mutations on the same id therefore cannot interleave into an
//! inconsistent status: the loser observes a `Conflict`.

use std::collections::HashMap;
use std::str::FromStr;

use imagevault_common::{Error, ImageId, ImageStatus, Result};

use crate::models::{ImageChanges, ImageRecord};

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDir {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::invalid(format!("invalid sort direction '{other}'"))),
        }
    }
}

/// Record field a listing can be ordered by.
///
/// Ordering always falls back to creation time and then id, so pagination
/// is stable even when the primary key ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    Status,
    Size,
    #[default]
    CreatedAt,
    UpdatedAt,
    Id,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(Self::Name),
            "status" => Ok(Self::Status),
            "size" => Ok(Self::Size),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            "id" => Ok(Self::Id),
            other => Err(Error::invalid(format!("invalid sort key '{other}'"))),
        }
    }
}

/// Parameters for a record listing.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Raw filter map; see [`crate::filters`] for accepted keys.
    pub filters: HashMap<String, String>,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
    /// Pagination marker: results start after this record.
    pub marker: Option<ImageId>,
    pub limit: Option<usize>,
}

/// Durable store for image records.
///
/// Implementations must be safe for concurrent use; `transition` and
/// `soft_delete` are the serialization points for status changes.
pub trait MetadataStore: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` on id collision.
    fn create(&self, record: ImageRecord) -> Result<ImageRecord>;

    /// Fetch a record by id, including soft-deleted records.
    fn get(&self, id: ImageId) -> Result<ImageRecord>;

    /// Apply a metadata changeset. Must not be used for status changes.
    fn update(&self, id: ImageId, changes: ImageChanges, purge_props: bool)
        -> Result<ImageRecord>;

    /// Atomically apply a changeset carrying a status change, but only if
    /// the record's current status is one of `from`. Fails with `Conflict`
    /// otherwise, `NotFound` if the record does not exist.
    fn transition(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        changes: ImageChanges,
    ) -> Result<ImageRecord>;

    /// Mark a record soft-deleted with the given terminal-path status
    /// (`deleted`, or `pending_delete` when byte removal is deferred),
    /// but only if the current status is one of `from`.
    fn soft_delete(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        to: ImageStatus,
    ) -> Result<ImageRecord>;

    /// List records matching the query, ordered by the requested key then
    /// creation time then id. Excludes soft-deleted records unless the
    /// `deleted` filter asks for them.
    fn list(&self, query: &ListQuery) -> Result<Vec<ImageRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_dir_parse() {
        assert_eq!("asc".parse::<SortDir>().unwrap(), SortDir::Asc);
        assert_eq!("desc".parse::<SortDir>().unwrap(), SortDir::Desc);
        assert!("sideways".parse::<SortDir>().is_err());
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("size".parse::<SortKey>().unwrap(), SortKey::Size);
        assert_eq!("created_at".parse::<SortKey>().unwrap(), SortKey::CreatedAt);
        assert!("checksum9".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_default_query() {
        let query = ListQuery::default();
        assert_eq!(query.sort_key, SortKey::CreatedAt);
        assert_eq!(query.sort_dir, SortDir::Desc);
        assert!(query.marker.is_none());
        assert!(query.limit.is_none());
    }
}
