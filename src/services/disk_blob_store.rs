//! Local filesystem blob backend.
//!
//! Payloads live under `root/{shard}/{shard}/{key}` where the shards are the
//! first two bytes of SHA-256(key). Side metadata is kept in a parallel tree
//! at `root/.meta/{shard}/{shard}/{key}.json`.

use super::blob_store::{
    BlobAttributes, BlobError, BlobResult, BlobStore, StoredBlob, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SIDECAR_DIR: &str = ".meta";

#[derive(Clone, Debug)]
pub struct DiskBlobStore {
    /// Directory acting as the bucket.
    root: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct Sidecar {
    content_type: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl DiskBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shards(key: &str) -> (String, String) {
        let digest = Sha256::digest(key.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `root/{shard}/{shard}/{key}`; parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.root.join(SIDECAR_DIR);
        path.push(shard_a);
        path.push(shard_b);
        path.push(format!("{key}.json"));
        path
    }

    /// Write `bytes` to a fresh temp file next to `target` and fsync it.
    async fn write_temp(target: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(tmp_path)
    }

    async fn write_sidecar(&self, key: &str, attributes: &BlobAttributes) -> BlobResult<()> {
        let sidecar = Sidecar {
            content_type: attributes.content_type.clone(),
            metadata: attributes.metadata.clone(),
        };
        let body = serde_json::to_vec(&sidecar)
            .map_err(|err| BlobError::Backend(format!("encoding side metadata: {err}")))?;
        let path = self.sidecar_path(key);
        let tmp_path = Self::write_temp(&path, &body).await?;
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn read_sidecar(&self, key: &str) -> BlobResult<BlobAttributes> {
        match fs::read(self.sidecar_path(key)).await {
            Ok(body) => {
                let sidecar: Sidecar = serde_json::from_slice(&body)
                    .map_err(|err| BlobError::Backend(format!("decoding side metadata: {err}")))?;
                Ok(BlobAttributes {
                    content_type: sidecar.content_type,
                    metadata: sidecar.metadata,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BlobAttributes::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_if_present(path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Recursively remove empty directories up to `stop`.
    ///
    /// Stops when a directory is not empty, not found, `stop` is reached, or on
    /// any unexpected I/O error.
    async fn prune_empty_dirs(start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, attributes: BlobAttributes) -> BlobResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let tmp_path = Self::write_temp(&file_path, &bytes).await?;

        // hard_link refuses to replace an existing file, rename would not.
        let linked = fs::hard_link(&tmp_path, &file_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match linked {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobError::AlreadyExists(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.write_sidecar(key, &attributes).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        debug!(key, size = bytes.len(), "stored blob on disk");
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<StoredBlob> {
        ensure_key_safe(key)?;
        let bytes = match fs::read(self.object_path(key)).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let attributes = self.read_sidecar(key).await?;
        Ok(StoredBlob { bytes, attributes })
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        ensure_key_safe(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let sidecar_path = self.sidecar_path(key);
        Self::remove_if_present(&file_path).await?;
        Self::remove_if_present(&sidecar_path).await?;

        if let Some(parent) = file_path.parent() {
            Self::prune_empty_dirs(parent, &self.root).await;
        }
        if let Some(parent) = sidecar_path.parent() {
            Self::prune_empty_dirs(parent, &self.root.join(SIDECAR_DIR)).await;
        }
        Ok(())
    }

    async fn ensure_bucket(&self) -> BlobResult<()> {
        if !fs::try_exists(&self.root).await? {
            fs::create_dir_all(&self.root).await?;
            tracing::info!("Created blob directory at {}", self.root.display());
        }
        Ok(())
    }

    /// Write/read/delete a probe file under the root.
    async fn ping(&self) -> BlobResult<()> {
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"probe")
            .await
            .map_err(|err| BlobError::Unreachable(format!("could not write probe file: {err}")))?;
        let read = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        match read {
            Ok(bytes) if bytes == b"probe" => Ok(()),
            Ok(_) => Err(BlobError::Unreachable("probe file content mismatch".into())),
            Err(err) => Err(BlobError::Unreachable(format!(
                "could not read probe file: {err}"
            ))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "disk"
    }
}
