//! Filesystem storage backend.
//!
//! Objects are stored as flat files named by image id under a configured
//! root directory. Size and checksum are computed while the stream is
//! written, so backend-reported values never depend on caller claims.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imagevault_common::{Error, ImageId, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::ingest::reader::{map_read_error, StreamDigest};

use super::{ByteReader, Location, StorageBackend};

const CHUNK_SIZE: usize = 64 * 1024;

/// ENOSPC, surfaced by the OS when the backing volume fills up.
const NO_SPACE: i32 = 28;

/// Storage backend persisting objects under a local directory.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, id: ImageId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn path_from_location(location: &Location) -> Result<&Path> {
        location
            .as_str()
            .strip_prefix("file://")
            .map(Path::new)
            .ok_or_else(|| {
                Error::invalid(format!("not a filesystem location: {location}"))
            })
    }

    async fn write_stream(
        file: &mut File,
        mut reader: ByteReader,
    ) -> Result<(u64, String)> {
        let mut digest = StreamDigest::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(map_read_error)?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(classify_write_error)?;
        }
        file.flush().await.map_err(classify_write_error)?;
        Ok(digest.finalize())
    }
}

fn classify_write_error(e: std::io::Error) -> Error {
    if e.raw_os_error() == Some(NO_SPACE) {
        Error::StorageFull
    } else if e.kind() == std::io::ErrorKind::PermissionDenied {
        Error::StorageWriteDenied
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn add(
        &self,
        id: ImageId,
        reader: ByteReader,
        _declared_size: Option<u64>,
    ) -> Result<(Location, u64, String)> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(classify_write_error)?;

        let path = self.object_path(id);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::duplicate(id.to_string()),
                std::io::ErrorKind::PermissionDenied => Error::StorageWriteDenied,
                _ => classify_write_error(e),
            })?;

        match Self::write_stream(&mut file, reader).await {
            Ok((size, checksum)) => {
                let location = Location::parse(&format!("file://{}", path.display()))?;
                tracing::debug!(
                    "Wrote {size} bytes for image {id} to {location} with checksum {checksum}"
                );
                Ok((location, size, checksum))
            }
            Err(e) => {
                // Partial objects are never left behind.
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    tracing::error!(
                        "Failed to remove partial object for image {id}: {cleanup}"
                    );
                }
                Err(e)
            }
        }
    }

    async fn get(&self, location: &Location) -> Result<(ByteReader, u64)> {
        let path = Self::path_from_location(location)?;
        let file = File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::not_found(format!("object at {location}"))
            }
            _ => Error::Io(e),
        })?;
        let size = file
            .metadata()
            .await
            .map_err(Error::Io)?
            .len();
        Ok((Box::new(file), size))
    }

    async fn get_size(&self, location: &Location) -> Result<u64> {
        let path = Self::path_from_location(location)?;
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("object at {location}")))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn delete(&self, location: &Location) -> Result<()> {
        let path = Self::path_from_location(location)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("object at {location}")))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}
