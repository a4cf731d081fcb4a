//! Storage backend contract and scheme registry.
//!
//! Byte content lives behind [`StorageBackend`] implementations selected by
//! the scheme of a [`Location`] URI. The registry is built once at startup;
//! requests never inspect backend types at runtime.

mod filesystem;
mod http;
mod memory;

pub use filesystem::FilesystemBackend;
pub use http::HttpBackend;
pub use memory::MemoryBackend;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use imagevault_common::{Error, ImageId, Result};
use tokio::io::AsyncRead;

/// Boxed byte stream flowing into or out of a backend.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A URI whose scheme identifies the owning storage backend.
///
/// The payload after the scheme is opaque to everything except that
/// backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    uri: String,
    scheme_len: usize,
}

impl Location {
    /// Parse a location URI, requiring a `scheme://` prefix.
    pub fn parse(uri: &str) -> Result<Self> {
        let scheme_len = uri
            .find("://")
            .filter(|&idx| idx > 0)
            .ok_or_else(|| Error::invalid(format!("badly formed location URI '{uri}'")))?;
        Ok(Self {
            uri: uri.to_string(),
            scheme_len,
        })
    }

    /// The URI scheme, lowercased by convention at parse boundaries.
    pub fn scheme(&self) -> &str {
        &self.uri[..self.scheme_len]
    }

    /// The full URI.
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Byte-level object store for image content.
///
/// `add` is the source of truth for size and checksum: both are observed
/// while writing, never taken from caller-declared values.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The URI scheme this backend owns.
    fn scheme(&self) -> &'static str;

    /// Consume the stream and persist it under the given id.
    ///
    /// Returns the final location together with the size and SHA-256
    /// checksum observed while writing.
    async fn add(
        &self,
        id: ImageId,
        reader: ByteReader,
        declared_size: Option<u64>,
    ) -> Result<(Location, u64, String)>;

    /// Open the object at a location for reading, returning its size.
    async fn get(&self, location: &Location) -> Result<(ByteReader, u64)>;

    /// Size of the object at a location without reading it.
    async fn get_size(&self, location: &Location) -> Result<u64>;

    /// Remove the object at a location. Fails with `NotFound` if absent.
    async fn delete(&self, location: &Location) -> Result<()>;
}

/// Scheme-keyed registry of storage backends, resolved once at
/// configuration time.
pub struct StoreRegistry {
    backends: HashMap<&'static str, Arc<dyn StorageBackend>>,
    default_scheme: String,
}

impl StoreRegistry {
    pub fn new(default_scheme: impl Into<String>) -> Self {
        Self {
            backends: HashMap::new(),
            default_scheme: default_scheme.into(),
        }
    }

    /// Register a backend under its scheme.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(backend.scheme(), backend);
    }

    /// Resolve the backend for a scheme string.
    pub fn for_scheme(&self, scheme: &str) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
    }

    /// Resolve the backend owning a location.
    pub fn for_location(&self, location: &Location) -> Result<Arc<dyn StorageBackend>> {
        self.for_scheme(location.scheme())
    }

    /// The backend uploads go to when no scheme is requested.
    pub fn default_backend(&self) -> Result<Arc<dyn StorageBackend>> {
        self.for_scheme(&self.default_scheme)
    }

    /// Delete the object at a location, treating an already-gone object as
    /// success and logging (never raising) any other failure. Cleanup
    /// callers must not have their original error masked.
    pub async fn safe_delete(&self, location: &Location, id: ImageId) {
        let backend = match self.for_location(location) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!("Unable to delete data for image {id}: {e}");
                return;
            }
        };
        match backend.delete(location).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                tracing::debug!("Data for image {id} already absent from backend");
            }
            Err(e) => {
                tracing::error!("Failed to delete data for image {id}: {e}");
            }
        }
    }
}
