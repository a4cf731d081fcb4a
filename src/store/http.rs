//! Read-only HTTP storage backend.
//!
//! Serves the external-source paths: records may reference content hosted
//! elsewhere over `http`/`https`, and copy-from ingestion reads through
//! this backend. Writes and deletes are rejected; the registry never owns
//! remote content.

use async_trait::async_trait;
use futures::TryStreamExt;
use imagevault_common::{Error, ImageId, Result};
use tokio_util::io::StreamReader;

use super::{ByteReader, Location, StorageBackend};

/// Backend reading objects from remote HTTP servers.
pub struct HttpBackend {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpBackend {
    pub fn new(scheme: &'static str) -> Self {
        Self {
            client: reqwest::Client::new(),
            scheme,
        }
    }

    fn map_status_error(location: &Location, e: reqwest::Error) -> Error {
        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            Error::not_found(format!("object at {location}"))
        } else {
            Error::internal(format!("HTTP source {location} failed: {e}"))
        }
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn add(
        &self,
        _id: ImageId,
        _reader: ByteReader,
        _declared_size: Option<u64>,
    ) -> Result<(Location, u64, String)> {
        Err(Error::invalid(format!(
            "scheme '{}' does not support writing image data",
            self.scheme
        )))
    }

    async fn get(&self, location: &Location) -> Result<(ByteReader, u64)> {
        let response = self
            .client
            .get(location.as_str())
            .send()
            .await
            .map_err(|e| Error::internal(format!("HTTP source {location} failed: {e}")))?
            .error_for_status()
            .map_err(|e| Self::map_status_error(location, e))?;

        let size = response.content_length().unwrap_or(0);
        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok((Box::new(StreamReader::new(stream)), size))
    }

    async fn get_size(&self, location: &Location) -> Result<u64> {
        let response = self
            .client
            .head(location.as_str())
            .send()
            .await
            .map_err(|e| Error::internal(format!("HTTP source {location} failed: {e}")))?
            .error_for_status()
            .map_err(|e| Self::map_status_error(location, e))?;
        Ok(response.content_length().unwrap_or(0))
    }

    async fn delete(&self, _location: &Location) -> Result<()> {
        Err(Error::invalid(format!(
            "scheme '{}' does not support deleting image data",
            self.scheme
        )))
    }
}
