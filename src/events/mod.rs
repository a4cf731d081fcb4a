//! Image lifecycle event broadcasting.
//!
//! Every major transition emits an event on a broadcast channel that
//! external sinks (and tests) can subscribe to. Payloads carry the record
//! metadata through [`ImageEnvelope`], which has no location field at all:
//! location URIs can embed storage credentials, so the redaction is
//! structural rather than a filtering step someone can forget.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use imagevault_common::{ContainerFormat, DiskFormat, ImageId, ImageStatus};
use imagevault_db::ImageRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "image.create")]
    Create,
    #[serde(rename = "image.prepare")]
    Prepare,
    #[serde(rename = "image.upload")]
    Upload,
    #[serde(rename = "image.activate")]
    Activate,
    #[serde(rename = "image.update")]
    Update,
    #[serde(rename = "image.delete")]
    Delete,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "image.create",
            Self::Prepare => "image.prepare",
            Self::Upload => "image.upload",
            Self::Activate => "image.activate",
            Self::Update => "image.update",
            Self::Delete => "image.delete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record metadata as exposed in events and API responses.
///
/// Deliberately omits `location`; see the module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEnvelope {
    pub id: ImageId,
    pub name: Option<String>,
    pub disk_format: Option<DiskFormat>,
    pub container_format: Option<ContainerFormat>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub status: ImageStatus,
    pub is_public: bool,
    pub protected: bool,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub properties: HashMap<String, String>,
}

impl From<&ImageRecord> for ImageEnvelope {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            disk_format: record.disk_format,
            container_format: record.container_format,
            size: record.size,
            checksum: record.checksum.clone(),
            status: record.status,
            is_public: record.is_public,
            protected: record.protected,
            owner: record.owner.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
            deleted: record.deleted,
            properties: record.properties.clone(),
        }
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum ImageEvent {
    Info {
        kind: EventKind,
        image: ImageEnvelope,
    },
    Error {
        kind: EventKind,
        message: String,
    },
}

/// Broadcast sender for image lifecycle events.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ImageEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.tx.subscribe()
    }

    /// Emit an informational transition event.
    pub fn info(&self, kind: EventKind, record: &ImageRecord) {
        tracing::debug!("Notifying {kind} for image {}", record.id);
        let _ = self.tx.send(ImageEvent::Info {
            kind,
            image: ImageEnvelope::from(record),
        });
    }

    /// Emit an error event (e.g. a failed upload).
    pub fn error(&self, kind: EventKind, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("Notifying {kind} error: {message}");
        let _ = self.tx.send(ImageEvent::Error { kind, message });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
