//! SQLite-backed metadata store.
//!
//! Queries use named parameters and a single row parser. Status-changing
//! operations run inside an immediate transaction and re-check the prior
//! status before writing, so concurrent mutations on one id serialize at
//! the database.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use imagevault_common::{Error, ImageId, ImageStatus, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::filters;
use crate::models::{ImageChanges, ImageRecord};
use crate::pool::{get_conn, DbPool};
use crate::store::{ListQuery, MetadataStore};

/// Metadata store persisting records in SQLite.
pub struct SqliteMetadataStore {
    pool: DbPool,
}

impl SqliteMetadataStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = "id, name, disk_format, container_format, size, checksum, \
     status, location, is_public, protected, owner, created_at, updated_at, deleted_at, deleted";

/// Parse an image record from a database row (properties loaded separately).
///
/// Expects columns in [`RECORD_COLUMNS`] order.
fn parse_record_row(row: &rusqlite::Row) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get::<_, String>(0)?.parse().unwrap(),
        name: row.get(1)?,
        disk_format: row
            .get::<_, Option<String>>(2)?
            .map(|s| s.parse().unwrap()),
        container_format: row
            .get::<_, Option<String>>(3)?
            .map(|s| s.parse().unwrap()),
        size: row.get::<_, Option<i64>>(4)?.map(|s| s as u64),
        checksum: row.get(5)?,
        status: row.get::<_, String>(6)?.parse().unwrap(),
        location: row.get(7)?,
        is_public: row.get(8)?,
        protected: row.get(9)?,
        owner: row.get(10)?,
        created_at: parse_timestamp(&row.get::<_, String>(11)?),
        updated_at: parse_timestamp(&row.get::<_, String>(12)?),
        deleted_at: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_timestamp(&s)),
        deleted: row.get(14)?,
        properties: HashMap::new(),
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn load_properties(conn: &Connection, id: ImageId) -> Result<HashMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT name, value FROM image_properties WHERE image_id = :image_id")
        .map_err(|e| Error::database(e.to_string()))?;
    let props = stmt
        .query_map(
            rusqlite::named_params! { ":image_id": id.to_string() },
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(props)
}

fn save_properties(tx: &Transaction, record: &ImageRecord) -> Result<()> {
    tx.execute(
        "DELETE FROM image_properties WHERE image_id = :image_id",
        rusqlite::named_params! { ":image_id": record.id.to_string() },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    for (name, value) in &record.properties {
        tx.execute(
            "INSERT INTO image_properties (image_id, name, value)
             VALUES (:image_id, :name, :value)",
            rusqlite::named_params! {
                ":image_id": record.id.to_string(),
                ":name": name,
                ":value": value,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }
    Ok(())
}

fn write_record(tx: &Transaction, record: &ImageRecord) -> Result<()> {
    tx.execute(
        "UPDATE images SET name = :name, disk_format = :disk_format,
             container_format = :container_format, size = :size,
             checksum = :checksum, status = :status, location = :location,
             is_public = :is_public, protected = :protected, owner = :owner,
             updated_at = :updated_at, deleted_at = :deleted_at,
             deleted = :deleted
         WHERE id = :id",
        rusqlite::named_params! {
            ":id": record.id.to_string(),
            ":name": &record.name,
            ":disk_format": record.disk_format.map(|f| f.to_string()),
            ":container_format": record.container_format.map(|f| f.to_string()),
            ":size": record.size.map(|s| s as i64),
            ":checksum": &record.checksum,
            ":status": record.status.to_string(),
            ":location": &record.location,
            ":is_public": record.is_public,
            ":protected": record.protected,
            ":owner": &record.owner,
            ":updated_at": record.updated_at.to_rfc3339(),
            ":deleted_at": record.deleted_at.map(|t| t.to_rfc3339()),
            ":deleted": record.deleted,
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;
    save_properties(tx, record)
}

fn get_record(conn: &Connection, id: ImageId) -> Result<ImageRecord> {
    let result = conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM images WHERE id = :id"),
        rusqlite::named_params! { ":id": id.to_string() },
        parse_record_row,
    );
    match result {
        Ok(mut record) => {
            record.properties = load_properties(conn, id)?;
            Ok(record)
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(Error::not_found(format!("image {id}")))
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn create(&self, record: ImageRecord) -> Result<ImageRecord> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::database(e.to_string()))?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO images
                 (id, name, disk_format, container_format, size, checksum,
                  status, location, is_public, protected, owner,
                  created_at, updated_at, deleted_at, deleted)
             VALUES
                 (:id, :name, :disk_format, :container_format, :size, :checksum,
                  :status, :location, :is_public, :protected, :owner,
                  :created_at, :updated_at, :deleted_at, :deleted)",
            rusqlite::named_params! {
                ":id": record.id.to_string(),
                ":name": &record.name,
                ":disk_format": record.disk_format.map(|f| f.to_string()),
                ":container_format": record.container_format.map(|f| f.to_string()),
                ":size": record.size.map(|s| s as i64),
                ":checksum": &record.checksum,
                ":status": record.status.to_string(),
                ":location": &record.location,
                ":is_public": record.is_public,
                ":protected": record.protected,
                ":owner": &record.owner,
                ":created_at": record.created_at.to_rfc3339(),
                ":updated_at": record.updated_at.to_rfc3339(),
                ":deleted_at": record.deleted_at.map(|t| t.to_rfc3339()),
                ":deleted": record.deleted,
            },
        )
        .map_err(|e| Error::database(e.to_string()))?;

        if inserted == 0 {
            return Err(Error::duplicate(record.id.to_string()));
        }

        save_properties(&tx, &record)?;
        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        Ok(record)
    }

    fn get(&self, id: ImageId) -> Result<ImageRecord> {
        let conn = get_conn(&self.pool)?;
        get_record(&conn, id)
    }

    fn update(
        &self,
        id: ImageId,
        changes: ImageChanges,
        purge_props: bool,
    ) -> Result<ImageRecord> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::database(e.to_string()))?;

        let mut record = get_record(&tx, id)?;
        changes.apply_to(&mut record, purge_props);
        write_record(&tx, &record)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        Ok(record)
    }

    fn transition(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        changes: ImageChanges,
    ) -> Result<ImageRecord> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::database(e.to_string()))?;

        let mut record = get_record(&tx, id)?;
        if !from.contains(&record.status) {
            return Err(Error::conflict(format!(
                "image {id} is '{}', expected one of {:?}",
                record.status,
                from.iter().map(|s| s.to_string()).collect::<Vec<_>>()
            )));
        }
        changes.apply_to(&mut record, false);
        write_record(&tx, &record)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        Ok(record)
    }

    fn soft_delete(
        &self,
        id: ImageId,
        from: &[ImageStatus],
        to: ImageStatus,
    ) -> Result<ImageRecord> {
        let mut conn = get_conn(&self.pool)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::database(e.to_string()))?;

        let mut record = get_record(&tx, id)?;
        if !from.contains(&record.status) {
            return Err(Error::conflict(format!(
                "image {id} is '{}' and cannot be deleted",
                record.status
            )));
        }
        let now = Utc::now();
        record.status = to;
        record.deleted = true;
        record.deleted_at = Some(now);
        record.updated_at = now;
        write_record(&tx, &record)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        Ok(record)
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<ImageRecord>> {
        let conn = get_conn(&self.pool)?;
        if let Some(marker) = query.marker {
            get_record(&conn, marker)?;
        }

        let mut stmt = conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM images"))
            .map_err(|e| Error::database(e.to_string()))?;
        let mut records = stmt
            .query_map([], parse_record_row)
            .map_err(|e| Error::database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::database(e.to_string()))?;

        for record in &mut records {
            record.properties = load_properties(&conn, record.id)?;
        }

        filters::apply_query(records, query)
    }
}
