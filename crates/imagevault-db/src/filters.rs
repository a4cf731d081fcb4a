//! Listing filter parsing and query evaluation.
//!
//! Both store implementations evaluate listings through [`apply_query`] so
//! the filter, ordering, and pagination semantics cannot drift apart.
//!
//! Filter keys must name a record field; unknown keys are rejected except
//! `deleted` and `is_public`, which are always accepted. Keys ending in
//! `_min`/`_max` strip the suffix and compare numerically.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use imagevault_common::{
    ContainerFormat, DiskFormat, Error, ImageStatus, Result,
};

use crate::models::ImageRecord;
use crate::store::{ListQuery, SortDir, SortKey};

/// Record fields accepted as equality filters.
const EQUALITY_KEYS: &[&str] = &[
    "name",
    "status",
    "disk_format",
    "container_format",
    "checksum",
    "owner",
    "size",
    "is_public",
    "protected",
    "deleted",
];

/// Record fields accepted with a `_min`/`_max` suffix.
const RANGE_KEYS: &[&str] = &["size"];

/// A parsed, validated filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { key: String, value: String },
    Min { key: String, value: i64 },
    Max { key: String, value: i64 },
}

/// Parse and validate a raw filter map.
pub fn parse(raw: &HashMap<String, String>) -> Result<Vec<Filter>> {
    let mut parsed = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        if let Some(base) = key.strip_suffix("_min").or_else(|| key.strip_suffix("_max")) {
            if !RANGE_KEYS.contains(&base) {
                return Err(Error::invalid(format!("invalid filter key '{key}'")));
            }
            let bound: i64 = value.parse().map_err(|_| {
                Error::invalid(format!(
                    "invalid filter range value '{value}' for '{key}'"
                ))
            })?;
            if key.ends_with("_min") {
                parsed.push(Filter::Min {
                    key: base.to_string(),
                    value: bound,
                });
            } else {
                parsed.push(Filter::Max {
                    key: base.to_string(),
                    value: bound,
                });
            }
            continue;
        }

        if !EQUALITY_KEYS.contains(&key.as_str()) {
            return Err(Error::invalid(format!("invalid filter key '{key}'")));
        }

        // Reject malformed values up front so a bad filter never silently
        // matches nothing.
        match key.as_str() {
            "status" => {
                ImageStatus::from_str(value)?;
            }
            "disk_format" => {
                DiskFormat::from_str(value)?;
            }
            "container_format" => {
                ContainerFormat::from_str(value)?;
            }
            "size" => {
                value.parse::<u64>().map_err(|_| {
                    Error::invalid(format!("invalid filter value '{value}' for 'size'"))
                })?;
            }
            "is_public" | "protected" | "deleted" => {
                value.parse::<bool>().map_err(|_| {
                    Error::invalid(format!("invalid filter value '{value}' for '{key}'"))
                })?;
            }
            _ => {}
        }

        parsed.push(Filter::Eq {
            key: key.clone(),
            value: value.clone(),
        });
    }
    Ok(parsed)
}

fn matches(record: &ImageRecord, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { key, value } => match key.as_str() {
            "name" => record.name.as_deref() == Some(value.as_str()),
            "status" => record.status.to_string() == *value,
            "disk_format" => {
                record.disk_format.map(|f| f.to_string()).as_deref() == Some(value.as_str())
            }
            "container_format" => {
                record.container_format.map(|f| f.to_string()).as_deref()
                    == Some(value.as_str())
            }
            "checksum" => record.checksum.as_deref() == Some(value.as_str()),
            "owner" => record.owner.as_deref() == Some(value.as_str()),
            "size" => record.size == value.parse::<u64>().ok(),
            "is_public" => Some(record.is_public) == value.parse::<bool>().ok(),
            "protected" => Some(record.protected) == value.parse::<bool>().ok(),
            "deleted" => Some(record.deleted) == value.parse::<bool>().ok(),
            _ => false,
        },
        Filter::Min { key, value } => match key.as_str() {
            "size" => record.size.is_some_and(|s| s as i64 >= *value),
            _ => false,
        },
        Filter::Max { key, value } => match key.as_str() {
            "size" => record.size.is_some_and(|s| s as i64 <= *value),
            _ => false,
        },
    }
}

fn compare(a: &ImageRecord, b: &ImageRecord, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Status => a.status.to_string().cmp(&b.status.to_string()),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortKey::Id => a.id.cmp(&b.id),
    };
    primary
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Filter, order, and paginate a record set.
///
/// Soft-deleted records are excluded unless a `deleted` filter is present.
/// The caller is responsible for resolving the marker via `get` first; a
/// marker absent from the ordered result set still fails with `NotFound`.
pub fn apply_query(
    records: Vec<ImageRecord>,
    query: &ListQuery,
) -> Result<Vec<ImageRecord>> {
    let filters = parse(&query.filters)?;
    let show_deleted = query.filters.contains_key("deleted");

    let mut matched: Vec<ImageRecord> = records
        .into_iter()
        .filter(|r| show_deleted || !r.deleted)
        .filter(|r| filters.iter().all(|f| matches(r, f)))
        .collect();

    matched.sort_by(|a, b| {
        let ord = compare(a, b, query.sort_key);
        match query.sort_dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    });

    let start = match query.marker {
        None => 0,
        Some(marker) => {
            let pos = matched
                .iter()
                .position(|r| r.id == marker)
                .ok_or_else(|| Error::not_found(format!("marker {marker}")))?;
            pos + 1
        }
    };

    let mut page: Vec<ImageRecord> = matched.drain(..).skip(start).collect();
    if let Some(limit) = query.limit {
        page.truncate(limit);
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagevault_common::ImageId;

    fn record(name: &str, size: Option<u64>) -> ImageRecord {
        let mut r = ImageRecord::new(ImageId::new());
        r.name = Some(name.to_string());
        r.size = size;
        r
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let raw = HashMap::from([("flavor".to_string(), "large".to_string())]);
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn test_parse_always_allows_deleted_and_is_public() {
        let raw = HashMap::from([
            ("deleted".to_string(), "true".to_string()),
            ("is_public".to_string(), "false".to_string()),
        ]);
        assert_eq!(parse(&raw).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_non_numeric_range() {
        let raw = HashMap::from([("size_min".to_string(), "plenty".to_string())]);
        let err = parse(&raw).unwrap_err();
        assert!(err.to_string().contains("range"));
    }

    #[test]
    fn test_parse_rejects_range_on_non_numeric_field() {
        let raw = HashMap::from([("name_min".to_string(), "a".to_string())]);
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn test_size_range_inclusive() {
        let records = vec![
            record("a", Some(99)),
            record("b", Some(100)),
            record("c", Some(150)),
            record("d", Some(200)),
            record("e", Some(201)),
            record("f", None),
        ];
        let query = ListQuery {
            filters: HashMap::from([
                ("size_min".to_string(), "100".to_string()),
                ("size_max".to_string(), "200".to_string()),
            ]),
            sort_key: SortKey::Size,
            sort_dir: SortDir::Asc,
            ..Default::default()
        };
        let result = apply_query(records, &query).unwrap();
        let names: Vec<_> = result.iter().map(|r| r.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_deleted_records_hidden_by_default() {
        let mut dead = record("dead", None);
        dead.deleted = true;
        let records = vec![record("alive", None), dead];

        let result = apply_query(records.clone(), &ListQuery::default()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.as_deref(), Some("alive"));

        let query = ListQuery {
            filters: HashMap::from([("deleted".to_string(), "true".to_string())]),
            ..Default::default()
        };
        let result = apply_query(records, &query).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name.as_deref(), Some("dead"));
    }

    #[test]
    fn test_marker_pagination() {
        let a = record("a", Some(1));
        let b = record("b", Some(2));
        let c = record("c", Some(3));
        let marker = b.id;
        let records = vec![a, b, c];

        let query = ListQuery {
            sort_key: SortKey::Size,
            sort_dir: SortDir::Asc,
            marker: Some(marker),
            ..Default::default()
        };
        let result = apply_query(records, &query).unwrap();
        let names: Vec<_> = result.iter().map(|r| r.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn test_missing_marker_is_not_found() {
        let records = vec![record("a", None)];
        let query = ListQuery {
            marker: Some(ImageId::new()),
            ..Default::default()
        };
        assert!(matches!(
            apply_query(records, &query),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_limit_truncates() {
        let records = vec![record("a", None), record("b", None), record("c", None)];
        let query = ListQuery {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(apply_query(records, &query).unwrap().len(), 2);
    }
}
