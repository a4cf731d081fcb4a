//! Byte-removal scheduling.
//!
//! Metadata deletion always happens first; this module only decides when
//! the bytes go. Immediate mode deletes inline, treating an already-gone
//! object as success. Delayed mode hands `(location, id)` to a queue
//! drained by a background worker, so the request never waits on the
//! backend.

use std::sync::Arc;

use imagevault_common::ImageId;
use tokio::sync::mpsc;

use crate::store::{Location, StoreRegistry};

/// When byte content is removed relative to the metadata delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMode {
    Immediate,
    Delayed,
}

/// Schedules byte removal for deleted records.
pub struct Deleter {
    registry: Arc<StoreRegistry>,
    mode: DeletionMode,
    queue: mpsc::UnboundedSender<(Location, ImageId)>,
}

impl Deleter {
    /// Build a deleter together with the worker that drains its queue.
    ///
    /// The worker only matters in delayed mode, but it is cheap and
    /// harmless to run either way.
    pub fn new(registry: Arc<StoreRegistry>, mode: DeletionMode) -> (Arc<Self>, DeletionWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deleter = Arc::new(Self {
            registry: Arc::clone(&registry),
            mode,
            queue: tx,
        });
        (deleter, DeletionWorker { registry, rx })
    }

    pub fn delayed(&self) -> bool {
        self.mode == DeletionMode::Delayed
    }

    /// Remove (or schedule removal of) the bytes at a location.
    pub async fn initiate(&self, location: Location, id: ImageId) {
        match self.mode {
            DeletionMode::Delayed => {
                tracing::debug!("Scheduling delayed delete of {location} for image {id}");
                if self.queue.send((location, id)).is_err() {
                    tracing::error!(
                        "Delayed-delete queue is closed; data for image {id} not scheduled"
                    );
                }
            }
            DeletionMode::Immediate => {
                self.registry.safe_delete(&location, id).await;
            }
        }
    }
}

/// Background worker draining the delayed-deletion queue.
pub struct DeletionWorker {
    registry: Arc<StoreRegistry>,
    rx: mpsc::UnboundedReceiver<(Location, ImageId)>,
}

impl DeletionWorker {
    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        while let Some((location, id)) = self.rx.recv().await {
            tracing::info!("Deleting data at {location} for image {id}");
            self.registry.safe_delete(&location, id).await;
        }
    }
}
