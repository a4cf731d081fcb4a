//! In-process storage backend.
//!
//! Holds objects in a concurrent map under the `mem` scheme. Used by the
//! test suites so the full ingestion protocol can run without touching a
//! filesystem or network.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use imagevault_common::{Error, ImageId, Result};
use tokio::io::AsyncReadExt;

use crate::ingest::reader::{map_read_error, StreamDigest};

use super::{ByteReader, Location, StorageBackend};

/// Storage backend keeping objects in memory.
#[derive(Default)]
pub struct MemoryBackend {
    objects: DashMap<String, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(location: &Location) -> Result<&str> {
        location
            .as_str()
            .strip_prefix("mem://")
            .ok_or_else(|| Error::invalid(format!("not a memory location: {location}")))
    }

    /// Number of stored objects, for test assertions.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn scheme(&self) -> &'static str {
        "mem"
    }

    async fn add(
        &self,
        id: ImageId,
        mut reader: ByteReader,
        _declared_size: Option<u64>,
    ) -> Result<(Location, u64, String)> {
        let key = id.to_string();
        if self.objects.contains_key(&key) {
            return Err(Error::duplicate(key));
        }

        let mut digest = StreamDigest::new();
        let mut data = Vec::new();
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            let n = reader.read(&mut buf).await.map_err(map_read_error)?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            data.extend_from_slice(&buf[..n]);
        }

        let (size, checksum) = digest.finalize();
        let location = Location::parse(&format!("mem://{key}"))?;
        self.objects.insert(key, Bytes::from(data));
        Ok((location, size, checksum))
    }

    async fn get(&self, location: &Location) -> Result<(ByteReader, u64)> {
        let key = Self::key(location)?;
        let data = self
            .objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(format!("object at {location}")))?;
        let size = data.len() as u64;
        Ok((Box::new(std::io::Cursor::new(data.to_vec())), size))
    }

    async fn get_size(&self, location: &Location) -> Result<u64> {
        let key = Self::key(location)?;
        self.objects
            .get(key)
            .map(|entry| entry.value().len() as u64)
            .ok_or_else(|| Error::not_found(format!("object at {location}")))
    }

    async fn delete(&self, location: &Location) -> Result<()> {
        let key = Self::key(location)?;
        self.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("object at {location}")))
    }
}
