//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an in-memory metadata store, the
//! `mem` storage backend, and a full [`IngestService`]. The
//! [`with_server`](TestHarness::with_server) constructor additionally
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use imagevault::config::Config;
use imagevault::events::Notifier;
use imagevault::ingest::{Deleter, DeletionMode, IngestService, TaskPool};
use imagevault::policy::AllowAll;
use imagevault::server::{create_router, AppContext};
use imagevault::store::{MemoryBackend, StorageBackend, StoreRegistry};
use imagevault_common::{ImageId, ImageStatus};
use imagevault_db::{MemoryMetadataStore, MetadataStore};

/// Size cap used by the harness; tests exceeding it are deliberate.
pub const TEST_SIZE_CAP: u64 = 1024 * 1024;

pub struct TestHarness {
    pub service: Arc<IngestService>,
    pub meta: Arc<MemoryMetadataStore>,
    pub backend: Arc<MemoryBackend>,
    pub registry: Arc<StoreRegistry>,
}

impl TestHarness {
    /// Harness with immediate byte deletion.
    pub fn new() -> Self {
        Self::with_options(DeletionMode::Immediate, TEST_SIZE_CAP)
    }

    /// Harness with delayed byte deletion.
    pub fn delayed_delete() -> Self {
        Self::with_options(DeletionMode::Delayed, TEST_SIZE_CAP)
    }

    /// Fully parameterized harness. Must be called within a tokio
    /// runtime: the deletion worker is spawned onto it.
    pub fn with_options(mode: DeletionMode, size_cap: u64) -> Self {
        let meta = Arc::new(MemoryMetadataStore::new());
        let backend = Arc::new(MemoryBackend::new());

        let mut registry = StoreRegistry::new("mem");
        registry.register(Arc::clone(&backend) as Arc<dyn StorageBackend>);
        let registry = Arc::new(registry);

        let (deleter, worker) = Deleter::new(Arc::clone(&registry), mode);
        tokio::spawn(worker.run());

        let service = Arc::new(IngestService::new(
            Arc::clone(&meta) as Arc<dyn MetadataStore>,
            Arc::clone(&registry),
            Notifier::new(),
            Arc::new(AllowAll),
            TaskPool::new(8),
            deleter,
            size_cap,
        ));

        Self {
            service,
            meta,
            backend,
            registry,
        }
    }

    /// Start an Axum server on a random port and return the harness
    /// together with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let ctx = AppContext {
            service: Arc::clone(&harness.service),
            config: Arc::new(Config::default()),
        };
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Poll the metadata store until the record reaches the expected
    /// status, or panic after a couple of seconds. Used for the detached
    /// copy-from path, whose only observable outcome is the status.
    pub async fn wait_for_status(&self, id: ImageId, expected: ImageStatus) {
        for _ in 0..200 {
            if matches!(self.meta.get(id), Ok(r) if r.status == expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "image {id} never reached {expected:?}; currently {:?}",
            self.meta.get(id).map(|r| r.status)
        );
    }

    /// Seed the `mem` backend with an object and return its location URI.
    pub async fn seed_object(&self, data: &[u8]) -> String {
        let id = ImageId::new();
        let (location, _, _) = self
            .backend
            .add(
                id,
                Box::new(std::io::Cursor::new(data.to_vec())),
                Some(data.len() as u64),
            )
            .await
            .expect("failed to seed object");
        location.to_string()
    }
}

/// SHA-256 hex digest, for asserting backend-computed checksums.
pub fn digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
