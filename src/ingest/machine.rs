//! The ingestion state machine.
//!
//! [`IngestService`] owns every status transition an image record can
//! make. Four scenarios exist when creating an image:
//!
//! 1. Content arrives inline: the record is reserved `queued`, moves to
//!    `saving` while the stream is written, then `active` on success or
//!    `killed` on any failure.
//! 2. Content is copied from an external source asynchronously: the
//!    request returns with the record still `queued` and a detached task
//!    performs the upload protocol.
//! 3. Content is referenced externally by location: the record activates
//!    directly, without any bytes moving.
//! 4. No content at all: the record stays `queued` for a later upload.
//!
//! Failure containment: a failed upload must never leave a record in a
//! servable or transfer-in-progress state, so every failure path marks
//! the record `killed` (best-effort, logged) before the error reaches the
//! caller.

use std::collections::HashMap;
use std::sync::Arc;

use imagevault_common::{
    ContainerFormat, DiskFormat, Error, ImageId, ImageStatus, Result,
};
use imagevault_db::{ImageChanges, ImageRecord, ListQuery, MetadataStore};
use serde::Deserialize;

use crate::events::{EventKind, Notifier};
use crate::policy::{Policy, Principal};
use crate::store::{ByteReader, Location, StoreRegistry};

use super::deleter::Deleter;
use super::pool::TaskPool;
use super::reader::{self, LimitedReader};

const MAX_NAME_LENGTH: usize = 255;

/// Inbound byte content for an upload.
pub struct Content {
    pub reader: ByteReader,
    /// Content length when the transport knows it up front; `None` for
    /// chunked streams.
    pub declared_size: Option<u64>,
}

impl Content {
    pub fn new(reader: ByteReader, declared_size: Option<u64>) -> Self {
        Self {
            reader,
            declared_size,
        }
    }

    /// Content backed by an in-memory buffer, with its length declared.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let declared = data.len() as u64;
        Self {
            reader: Box::new(std::io::Cursor::new(data)),
            declared_size: Some(declared),
        }
    }
}

/// Metadata supplied when reserving a new record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReserveRequest {
    pub id: Option<ImageId>,
    pub name: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub container_format: Option<ContainerFormat>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub is_public: bool,
    pub protected: bool,
    pub owner: Option<String>,
    pub properties: HashMap<String, String>,
    /// External location the content should be served from.
    pub location: Option<String>,
    /// External source the content should be copied from, asynchronously.
    pub copy_from: Option<String>,
}

/// Metadata supplied when updating an existing record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub container_format: Option<ContainerFormat>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub is_public: Option<bool>,
    pub protected: Option<bool>,
    pub owner: Option<String>,
    pub properties: Option<HashMap<String, String>>,
    pub location: Option<String>,
    pub copy_from: Option<String>,
}

/// Orchestrator for reservation, upload, activation, update, and
/// deletion of image records.
pub struct IngestService {
    meta: Arc<dyn MetadataStore>,
    registry: Arc<StoreRegistry>,
    notifier: Notifier,
    policy: Arc<dyn Policy>,
    pool: TaskPool,
    deleter: Arc<Deleter>,
    image_size_cap: u64,
}

impl IngestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        registry: Arc<StoreRegistry>,
        notifier: Notifier,
        policy: Arc<dyn Policy>,
        pool: TaskPool,
        deleter: Arc<Deleter>,
        image_size_cap: u64,
    ) -> Self {
        Self {
            meta,
            registry,
            notifier,
            policy,
            pool,
            deleter,
            image_size_cap,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Reserve a record and ingest its content, if any was supplied.
    pub async fn create(
        self: &Arc<Self>,
        principal: &Principal,
        req: ReserveRequest,
        content: Option<Content>,
    ) -> Result<ImageRecord> {
        self.policy.enforce(principal, "add_image")?;
        if req.is_public {
            self.policy.enforce(principal, "publicize_image")?;
        }
        if req.copy_from.is_some() {
            self.policy.enforce(principal, "copy_from")?;
        }

        let record = self.reserve(principal, &req).await?;
        let result = self
            .handle_source(
                record,
                content,
                req.copy_from.as_deref(),
                req.location.as_deref(),
            )
            .await;
        log_mutating("create", result)
    }

    /// Update a record's metadata and, when permitted, its content or
    /// external source.
    pub async fn update(
        self: &Arc<Self>,
        principal: &Principal,
        id: ImageId,
        req: UpdateRequest,
        content: Option<Content>,
        purge: Option<bool>,
    ) -> Result<ImageRecord> {
        self.policy.enforce(principal, "modify_image")?;
        if req.is_public == Some(true) {
            self.policy.enforce(principal, "publicize_image")?;
        }

        let result = self.apply_update(principal, id, req, content, purge).await;
        log_mutating("update", result)
    }

    /// Soft-delete a record and hand its bytes to the deletion scheduler.
    pub async fn delete(&self, principal: &Principal, id: ImageId) -> Result<()> {
        self.policy.enforce(principal, "delete_image")?;

        let result = self.apply_delete(id).await;
        log_mutating("delete", result)
    }

    /// Fetch a record's metadata.
    pub fn metadata(&self, principal: &Principal, id: ImageId) -> Result<ImageRecord> {
        self.policy.enforce(principal, "get_image")?;

        let record = self.meta.get(id)?;
        if record.deleted || !self.visible(principal, &record) {
            return Err(Error::not_found(format!("image {id}")));
        }
        Ok(record)
    }

    /// Open an active record's content for download.
    ///
    /// Returns `None` for the stream when the record holds no bytes
    /// (empty-content reservation).
    pub async fn download(
        &self,
        principal: &Principal,
        id: ImageId,
    ) -> Result<(ImageRecord, Option<(ByteReader, u64)>)> {
        self.policy.enforce(principal, "get_image")?;
        self.policy.enforce(principal, "download_image")?;

        let record = self.metadata(principal, id)?;
        if record.status != ImageStatus::Active {
            return Err(Error::not_found(format!("image {id} is not active")));
        }

        if record.size == Some(0) {
            return Ok((record, None));
        }
        let Some(uri) = record.location.clone() else {
            return Ok((record, None));
        };

        let location = Location::parse(&uri)?;
        let backend = self.registry.for_location(&location)?;
        let (reader, size) = backend.get(&location).await?;
        Ok((record, Some((reader, size))))
    }

    /// List records visible to the principal.
    pub fn list(&self, principal: &Principal, query: &ListQuery) -> Result<Vec<ImageRecord>> {
        self.policy.enforce(principal, "get_images")?;

        let records = self.meta.list(query)?;
        Ok(records
            .into_iter()
            .filter(|r| self.visible(principal, r))
            .collect())
    }

    // ========================================================================
    // Reservation
    // ========================================================================

    /// Persist a new record with status `queued`, or `active` immediately
    /// when the declared size is exactly zero.
    async fn reserve(
        &self,
        principal: &Principal,
        req: &ReserveRequest,
    ) -> Result<ImageRecord> {
        let (disk_format, container_format) = validate_formats(
            req.name.as_deref(),
            req.disk_format,
            req.container_format,
        )?;
        let source = self.external_source(principal, req.location.as_deref(), req.copy_from.as_deref())?;

        let id = req.id.unwrap_or_else(ImageId::new);
        let mut record = ImageRecord::new(id);
        record.name = req.name.clone();
        record.disk_format = disk_format;
        record.container_format = container_format;
        record.size = req.size;
        record.checksum = req.checksum.clone();
        record.is_public = req.is_public;
        record.protected = req.protected;
        record.owner = req.owner.clone().or_else(|| principal.owner.clone());
        record.properties = req.properties.clone();

        if let Some(source) = &source {
            if record.size.is_none() {
                // Learn the size from the remote store when not declared.
                record.size = self.remote_size(source).await;
            }
        }

        record.status = if record.size == Some(0) {
            // Empty-content shortcut: nothing will ever be uploaded.
            ImageStatus::Active
        } else {
            ImageStatus::Queued
        };

        let record = self.meta.create(record)?;
        self.notifier.info(EventKind::Create, &record);
        Ok(record)
    }

    async fn remote_size(&self, source: &Location) -> Option<u64> {
        let backend = match self.registry.for_location(source) {
            Ok(backend) => backend,
            Err(_) => return None,
        };
        match backend.get_size(source).await {
            Ok(size) => Some(size),
            Err(e) => {
                tracing::debug!("Unable to learn size of {source}: {e}");
                None
            }
        }
    }

    /// Validate an external source (location or copy-from) and resolve its
    /// scheme eagerly. Local schemes are rejected: a location header must
    /// never reach into the server's own filesystem.
    fn external_source(
        &self,
        principal: &Principal,
        location: Option<&str>,
        copy_from: Option<&str>,
    ) -> Result<Option<Location>> {
        let source = if let Some(location) = location {
            self.policy.enforce(principal, "set_image_location")?;
            location
        } else {
            match copy_from {
                Some(copy_from) => copy_from,
                None => return Ok(None),
            }
        };

        let parsed = Location::parse(source)?;
        if parsed.scheme().eq_ignore_ascii_case("file") {
            return Err(Error::invalid(format!(
                "external sourcing not supported for '{source}'"
            )));
        }
        self.registry.for_location(&parsed)?;
        Ok(Some(parsed))
    }

    // ========================================================================
    // Upload / activation
    // ========================================================================

    /// Route a reserved record to the right ingestion branch.
    async fn handle_source(
        self: &Arc<Self>,
        record: ImageRecord,
        content: Option<Content>,
        copy_from: Option<&str>,
        location: Option<&str>,
    ) -> Result<ImageRecord> {
        if let Some(content) = content {
            self.upload_and_activate(record.id, content).await
        } else if let Some(copy_from) = copy_from {
            tracing::info!(
                "Triggering asynchronous copy from external source for image {}",
                record.id
            );
            self.schedule_copy(record.id, Location::parse(copy_from)?);
            Ok(record)
        } else if let Some(location) = location {
            if record.status == ImageStatus::Queued {
                self.activate(record.id, &Location::parse(location)?).await
            } else {
                // Empty-content shortcut already activated the record.
                Ok(record)
            }
        } else {
            Ok(record)
        }
    }

    /// Run the full upload protocol, then bind the resulting location.
    async fn upload_and_activate(
        &self,
        id: ImageId,
        content: Content,
    ) -> Result<ImageRecord> {
        let location = self.upload(id, content).await?;
        match self.activate(id, &location).await {
            Ok(record) => Ok(record),
            Err(e) => {
                // The bytes landed but the record cannot serve them; it
                // must not stay in `saving`.
                self.safe_kill(id);
                Err(e)
            }
        }
    }

    /// Stream content into the default backend.
    ///
    /// The record moves to `saving` first; the freshly read prior status
    /// gates that write, so a concurrent second upload loses with
    /// `Conflict` before any byte moves. On any failure the record is
    /// marked `killed` before the error propagates.
    async fn upload(&self, id: ImageId, content: Content) -> Result<Location> {
        let record = self.meta.transition(
            id,
            &[ImageStatus::Queued],
            ImageChanges::status(ImageStatus::Saving),
        )?;
        tracing::debug!("Setting image {id} to status 'saving'");
        self.notifier.info(EventKind::Prepare, &record);

        match self.store_bytes(&record, content).await {
            Ok(location) => Ok(location),
            Err(e) => {
                self.safe_kill(id);
                Err(self.classify_upload_error(id, e))
            }
        }
    }

    async fn store_bytes(&self, record: &ImageRecord, content: Content) -> Result<Location> {
        let backend = self.registry.default_backend()?;

        // Known lengths are checked once before streaming starts; unknown
        // (chunked) lengths are counted against the cap read-by-read.
        reader::check_declared(content.declared_size, self.image_size_cap)?;
        let reader: ByteReader =
            Box::new(LimitedReader::new(content.reader, self.image_size_cap));

        tracing::debug!(
            "Uploading image data for image {} to '{}' store",
            record.id,
            backend.scheme()
        );
        let (location, size, checksum) =
            backend.add(record.id, reader, content.declared_size).await?;

        // The backend-observed values are the source of truth; any
        // mismatch with client-declared values is fatal.
        if record.size.is_some_and(|declared| declared != size) {
            return self
                .kill_mismatched(record, &location, "size")
                .await;
        }
        if record
            .checksum
            .as_deref()
            .is_some_and(|declared| declared != checksum)
        {
            return self
                .kill_mismatched(record, &location, "checksum")
                .await;
        }

        tracing::debug!(
            "Updating image {} data. Checksum set to {checksum}, size set to {size}",
            record.id
        );
        let changes = ImageChanges {
            size: Some(size),
            checksum: Some(checksum),
            ..Default::default()
        };
        let updated = self.meta.update(record.id, changes, false)?;
        self.notifier.info(EventKind::Upload, &updated);

        Ok(location)
    }

    async fn kill_mismatched(
        &self,
        record: &ImageRecord,
        location: &Location,
        attr: &str,
    ) -> Result<Location> {
        let msg = format!(
            "Supplied {attr} and {attr} generated from uploaded image did not match. \
             Setting image {} status to 'killed'.",
            record.id
        );
        tracing::error!("{msg}");
        // The just-written bytes must not survive a failed verification.
        self.registry.safe_delete(location, record.id).await;
        Err(Error::invalid(msg))
    }

    /// Bind the location and set `active`, atomically.
    async fn activate(&self, id: ImageId, location: &Location) -> Result<ImageRecord> {
        let changes = ImageChanges {
            status: Some(ImageStatus::Active),
            location: Some(location.to_string()),
            ..Default::default()
        };
        let record = self.meta.transition(
            id,
            &[ImageStatus::Queued, ImageStatus::Saving],
            changes,
        )?;
        self.notifier.info(EventKind::Activate, &record);
        self.notifier.info(EventKind::Update, &record);
        Ok(record)
    }

    /// Read the full object from a source backend, then run exactly the
    /// upload protocol on it.
    async fn copy_and_activate(
        &self,
        id: ImageId,
        source: Location,
    ) -> Result<ImageRecord> {
        let backend = self.registry.for_location(&source)?;
        let (reader, size) = match backend.get(&source).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.safe_kill(id);
                return Err(Error::invalid(format!(
                    "copy from external source failed: {e}"
                )));
            }
        };
        let declared_size = (size > 0).then_some(size);
        self.upload_and_activate(id, Content::new(reader, declared_size))
            .await
    }

    /// Detach a copy-from ingestion onto the task pool.
    ///
    /// Fire-and-forget: the caller gets no result channel, and a failure
    /// surfaces only as the record ending up `killed`.
    fn schedule_copy(self: &Arc<Self>, id: ImageId, source: Location) {
        let service = Arc::clone(self);
        self.pool.spawn(async move {
            if let Err(e) = service.copy_and_activate(id, source).await {
                tracing::error!("Asynchronous copy into image {id} failed: {e}");
            }
        });
    }

    // ========================================================================
    // Update / delete
    // ========================================================================

    async fn apply_update(
        self: &Arc<Self>,
        principal: &Principal,
        id: ImageId,
        req: UpdateRequest,
        content: Option<Content>,
        purge: Option<bool>,
    ) -> Result<ImageRecord> {
        let orig = self.meta.get(id)?;

        if orig.deleted || orig.status == ImageStatus::Deleted {
            return Err(Error::forbidden("forbidden to update deleted image"));
        }

        // The default is to replace the property map wholesale, except
        // when new content rides along with the update.
        let purge_props = purge.unwrap_or(true) && content.is_none();

        if content.is_some() && orig.status != ImageStatus::Queued {
            return Err(Error::conflict("cannot upload to an unqueued image"));
        }

        let source = self.external_source(
            principal,
            req.location.as_deref(),
            req.copy_from.as_deref(),
        )?;

        // External-source binding is a one-time, queued-only decision.
        if source.is_some() && orig.status != ImageStatus::Queued {
            return Err(Error::invalid(
                "attempted to update location for an image not in queued status",
            ));
        }

        let activating =
            orig.status == ImageStatus::Queued && (source.is_some() || content.is_some());

        let (disk_format, container_format) =
            validate_formats(req.name.as_deref(), req.disk_format, req.container_format)?;

        let mut changes = ImageChanges {
            name: req.name.clone(),
            disk_format,
            container_format,
            size: req.size,
            checksum: req.checksum.clone(),
            is_public: req.is_public,
            protected: req.protected,
            owner: req.owner.clone(),
            properties: req.properties.clone(),
            ..Default::default()
        };
        if let Some(source) = &source {
            if changes.size.is_none() {
                changes.size = self.remote_size(source).await;
            }
        }

        let record = self.meta.update(id, changes, purge_props)?;

        let record = if activating {
            self.handle_source(
                record,
                content,
                req.copy_from.as_deref(),
                req.location.as_deref(),
            )
            .await?
        } else {
            record
        };

        self.notifier.info(EventKind::Update, &record);
        Ok(record)
    }

    async fn apply_delete(&self, id: ImageId) -> Result<()> {
        let record = self.meta.get(id)?;

        if record.protected {
            return Err(Error::forbidden("image is protected"));
        }
        match record.status {
            ImageStatus::PendingDelete => {
                return Err(Error::forbidden(
                    "forbidden to delete a pending_delete image",
                ));
            }
            ImageStatus::Deleted => {
                return Err(Error::not_found(format!("image {id}")));
            }
            _ => {}
        }

        let target = if record.location.is_some() && self.deleter.delayed() {
            ImageStatus::PendingDelete
        } else {
            ImageStatus::Deleted
        };

        // Metadata first: it is the authorization source of truth, so the
        // record must stop being visible before any backend interaction.
        let deleted = self.meta.soft_delete(
            id,
            &[
                ImageStatus::Queued,
                ImageStatus::Saving,
                ImageStatus::Active,
                ImageStatus::Killed,
            ],
            target,
        )?;

        // Never-uploaded records have no bytes to remove.
        if let Some(uri) = &record.location {
            match Location::parse(uri) {
                Ok(location) => self.deleter.initiate(location, id).await,
                Err(e) => {
                    tracing::error!("Stored location for image {id} is unusable: {e}")
                }
            }
        }

        self.notifier.info(EventKind::Delete, &deleted);
        Ok(())
    }

    // ========================================================================
    // Failure containment
    // ========================================================================

    /// Mark a record `killed` without raising: this runs inside error
    /// handlers, and the original error must never be masked.
    fn safe_kill(&self, id: ImageId) {
        if let Err(e) = self.meta.transition(
            id,
            &[ImageStatus::Queued, ImageStatus::Saving],
            ImageChanges::status(ImageStatus::Killed),
        ) {
            tracing::error!("Unable to kill image {id}: {e}");
        }
    }

    /// Map an upload failure onto the surfaced taxonomy, emitting error
    /// events for backend failures and hiding internals of unexpected
    /// ones.
    fn classify_upload_error(&self, id: ImageId, e: Error) -> Error {
        match e {
            Error::StorageFull => {
                let msg = format!("Image storage media is full: upload of {id} failed");
                tracing::error!("{msg}");
                self.notifier.error(EventKind::Upload, msg);
                Error::StorageFull
            }
            Error::StorageWriteDenied => {
                let msg =
                    format!("Insufficient permissions on image storage media for {id}");
                tracing::error!("{msg}");
                self.notifier.error(EventKind::Upload, msg);
                Error::StorageWriteDenied
            }
            Error::SizeLimitExceeded => {
                tracing::info!(
                    "Denying attempt to upload image larger than {} bytes",
                    self.image_size_cap
                );
                Error::SizeLimitExceeded
            }
            e @ (Error::Duplicate(_)
            | Error::Forbidden(_)
            | Error::Conflict(_)
            | Error::Invalid(_)
            | Error::NotFound(_)
            | Error::UnknownScheme(_)) => e,
            other => {
                tracing::error!("Failed to upload image {id}: {other}");
                Error::internal("failed to upload image")
            }
        }
    }

    fn visible(&self, principal: &Principal, record: &ImageRecord) -> bool {
        record.is_public || principal.can_see(record.owner.as_deref())
    }
}

/// Guaranteed result logging around every mutating entry point.
fn log_mutating<T>(op: &'static str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => tracing::debug!("{op} completed"),
        Err(e) => tracing::info!("{op} failed: {e}"),
    }
    result
}

/// Validate the enumerated format fields and the image name.
///
/// If either format belongs to the legacy kernel/ramdisk/machine trio,
/// the other must match or is auto-filled from it; a mismatch is a
/// validation failure.
fn validate_formats(
    name: Option<&str>,
    disk_format: Option<DiskFormat>,
    container_format: Option<ContainerFormat>,
) -> Result<(Option<DiskFormat>, Option<ContainerFormat>)> {
    if let Some(name) = name {
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::invalid(format!(
                "image name too long: {}",
                name.len()
            )));
        }
    }

    match (disk_format, container_format) {
        (Some(disk), Some(container))
            if disk.is_legacy_trio() || container.is_legacy_trio() =>
        {
            if disk.paired_container() == Some(container) {
                Ok((Some(disk), Some(container)))
            } else {
                Err(Error::invalid(
                    "invalid mix of disk and container formats: when setting a disk or \
                     container format to one of 'aki', 'ari', or 'ami', the container \
                     and disk formats must match",
                ))
            }
        }
        (Some(disk), None) if disk.is_legacy_trio() => {
            Ok((Some(disk), disk.paired_container()))
        }
        (None, Some(container)) if container.is_legacy_trio() => {
            Ok((container.paired_disk(), Some(container)))
        }
        _ => Ok((disk_format, container_format)),
    }
}
