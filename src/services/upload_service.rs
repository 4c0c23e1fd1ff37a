//! src/services/upload_service.rs
//!
//! UploadService: the upload-and-link transaction. A payload is written to the
//! blob store first and only then recorded in the metadata store, so a
//! component row never points at bytes that do not exist. When the metadata
//! write fails after the blob landed, the blob is deleted again; if that
//! delete fails too, the orphaned key is reported in the error.

use super::{
    blob_store::{BlobAttributes, BlobError, BlobStore, DEFAULT_CONTENT_TYPE},
    checksum::ChecksumHasher,
    metadata_store::{MetadataError, MetadataResult, MetadataStore},
    object_key::{KeyPlan, MAX_KEY_ATTEMPTS, ObjectKeyGenerator, ensure_segment_safe},
};
use crate::models::component::{NewSoftwareComponent, SoftwareComponent};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, pin_mut};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("recipe {0} not found")]
    RecipeNotFound(i64),
    #[error("invalid upload: {0}")]
    Validation(String),
    #[error("payload exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: usize },
    #[error("failed to read upload payload: {0}")]
    PayloadRead(#[source] io::Error),
    #[error("metadata store unavailable: {0}")]
    MetadataUnavailable(#[source] MetadataError),
    #[error("no free object key for `{base_key}` after {attempts} attempts")]
    KeyExhausted { base_key: String, attempts: u32 },
    #[error("blob write failed for `{key}`: {source}")]
    StorageWriteFailed {
        key: String,
        #[source]
        source: BlobError,
    },
    #[error("metadata write failed for `{key}`, uploaded blob was removed: {source}")]
    MetadataWriteFailed {
        key: String,
        #[source]
        source: MetadataError,
    },
    #[error("object key `{key}` is already recorded, uploaded blob was removed: {detail}")]
    UniqueConstraintViolation { key: String, detail: String },
    #[error(
        "metadata write failed for `{key}` ({metadata_error}) and removing the blob failed \
         ({cleanup_error}); blob `{key}` is orphaned"
    )]
    CompensationFailed {
        key: String,
        metadata_error: MetadataError,
        cleanup_error: BlobError,
    },
    #[error("upload task aborted: {0}")]
    Aborted(String),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    /// Stable name of the failure class, used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecipeNotFound(_) => "NotFound",
            Self::Validation(_) => "ValidationError",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::PayloadRead(_) => "PayloadReadFailed",
            Self::MetadataUnavailable(_) => "MetadataUnavailable",
            Self::KeyExhausted { .. } => "KeyExhausted",
            Self::StorageWriteFailed { .. } => "StorageWriteFailed",
            Self::MetadataWriteFailed { .. } => "MetadataWriteFailed",
            Self::UniqueConstraintViolation { .. } => "UniqueConstraintViolation",
            Self::CompensationFailed { .. } => "CompensationFailed",
            Self::Aborted(_) => "Aborted",
        }
    }

    /// The object key the failed upload was using, if it got that far.
    pub fn object_key(&self) -> Option<&str> {
        match self {
            Self::StorageWriteFailed { key, .. }
            | Self::MetadataWriteFailed { key, .. }
            | Self::UniqueConstraintViolation { key, .. }
            | Self::CompensationFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Key of a blob that exists without a metadata record.
    pub fn orphaned_key(&self) -> Option<&str> {
        match self {
            Self::CompensationFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether the failure left state behind in either backend.
    pub fn partial_state(&self) -> bool {
        self.orphaned_key().is_some()
    }
}

/// Upload request as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub recipe_id: i64,
    pub component_type: String,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// A fully read and hashed payload waiting to be stored.
struct StagedUpload {
    request: UploadRequest,
    plan: KeyPlan,
    bytes: Bytes,
    checksum: String,
    size: u64,
}

#[derive(Clone)]
pub struct UploadService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    keys: ObjectKeyGenerator,
    max_upload_bytes: usize,
}

impl UploadService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            metadata,
            blobs,
            keys: ObjectKeyGenerator::new(),
            max_upload_bytes,
        }
    }

    /// Replace the key generator (fixed clocks in tests).
    pub fn with_key_generator(mut self, keys: ObjectKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Upload a component payload and link it to its recipe.
    ///
    /// The payload stream is consumed only after the recipe is known to exist.
    /// Dropping the returned future while the payload is still being read
    /// leaves no state behind; once the blob write starts, the rest of the
    /// transaction runs on its own task so it always ends either committed or
    /// compensated.
    pub async fn upload_component<S>(
        &self,
        request: UploadRequest,
        payload: S,
    ) -> UploadResult<SoftwareComponent>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        ensure_segment_safe("component_type", &request.component_type)
            .map_err(|err| UploadError::Validation(err.to_string()))?;
        ensure_segment_safe("file name", &request.file_name)
            .map_err(|err| UploadError::Validation(err.to_string()))?;

        info!(
            recipe_id = request.recipe_id,
            component_type = %request.component_type,
            file_name = %request.file_name,
            "Received upload"
        );

        self.metadata
            .get_recipe(request.recipe_id)
            .await
            .map_err(|err| match err {
                MetadataError::NotFound { .. } => UploadError::RecipeNotFound(request.recipe_id),
                other => UploadError::MetadataUnavailable(other),
            })?;
        debug!(recipe_id = request.recipe_id, stage = "recipe_found", "parent recipe exists");

        let (bytes, checksum, size) = self.read_payload(payload).await?;
        info!(
            recipe_id = request.recipe_id,
            checksum = %checksum,
            size,
            stage = "payload_read",
            "payload hashed"
        );
        self.log_duplicates(&checksum).await;

        let plan = self
            .keys
            .plan(&request.component_type, &request.file_name)
            .map_err(|err| UploadError::Validation(err.to_string()))?;

        let staged = StagedUpload {
            request,
            plan,
            bytes,
            checksum,
            size,
        };
        let service = self.clone();
        tokio::spawn(async move { service.commit(staged).await })
            .await
            .map_err(|err| {
                error!(error = %err, "upload task did not complete");
                UploadError::Aborted(err.to_string())
            })?
    }

    /// Buffer the payload, hashing exactly the bytes that will be stored.
    async fn read_payload<S>(&self, payload: S) -> UploadResult<(Bytes, String, u64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        pin_mut!(payload);
        let mut buffer = BytesMut::new();
        let mut hasher = ChecksumHasher::new();
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|err| {
                warn!(error = %err, stage = "payload_read", "upload stream failed");
                UploadError::PayloadRead(err)
            })?;
            if buffer.len() + chunk.len() > self.max_upload_bytes {
                return Err(UploadError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);
        }
        let (checksum, size) = hasher.finalize();
        Ok((buffer.freeze(), checksum, size))
    }

    /// Same bytes already stored elsewhere: worth a log line, never a rejection.
    async fn log_duplicates(&self, checksum: &str) {
        match self.metadata.find_components_by_checksum(checksum).await {
            Ok(existing) if !existing.is_empty() => {
                let ids: Vec<i64> = existing.iter().map(|c| c.id).collect();
                info!(checksum, duplicate_of = ?ids, "identical payload already stored");
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "duplicate lookup failed"),
        }
    }

    /// Allocate a key, write the blob, record the row.
    async fn commit(&self, staged: StagedUpload) -> UploadResult<SoftwareComponent> {
        let StagedUpload {
            request,
            plan,
            bytes,
            checksum,
            size,
        } = staged;

        let attributes = BlobAttributes::for_component(
            Some(
                request
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            ),
            &checksum,
            &request.file_name,
        );
        let key = self.store_blob(&plan, bytes, attributes).await?;
        info!(object_key = %key, stage = "blob_stored", "payload written to blob store");

        let new = NewSoftwareComponent {
            recipe_id: request.recipe_id,
            component_type: request.component_type,
            object_key: key.clone(),
            checksum,
            original_filename: request.file_name,
            file_size_bytes: size as i64,
            upload_timestamp: plan.uploaded_at,
        };

        match self.record_component(&new).await {
            Ok(component) => {
                info!(
                    component_id = component.id,
                    recipe_id = component.recipe_id,
                    object_key = %component.object_key,
                    stage = "metadata_committed",
                    "Software component {} ({}) linked to recipe {}.",
                    component.id,
                    component.original_filename,
                    component.recipe_id
                );
                Ok(component)
            }
            Err(metadata_error) => Err(self.compensate(key, metadata_error).await),
        }
    }

    /// Try each candidate key until one is free and the create-only put succeeds.
    async fn store_blob(
        &self,
        plan: &KeyPlan,
        bytes: Bytes,
        attributes: BlobAttributes,
    ) -> UploadResult<String> {
        for key in plan.candidates() {
            match self.blobs.exists(&key).await {
                Ok(true) => {
                    debug!(object_key = %key, "object key taken, trying next candidate");
                    continue;
                }
                Ok(false) => {}
                Err(source) => {
                    error!(object_key = %key, error = %source, stage = "blob_write", "blob existence check failed");
                    return Err(UploadError::StorageWriteFailed { key, source });
                }
            }
            match self.blobs.put(&key, bytes.clone(), attributes.clone()).await {
                Ok(()) => return Ok(key),
                Err(BlobError::AlreadyExists(_)) => {
                    debug!(object_key = %key, "object key claimed concurrently, trying next candidate");
                }
                Err(source) => {
                    error!(object_key = %key, error = %source, stage = "blob_write", "blob write failed");
                    return Err(UploadError::StorageWriteFailed { key, source });
                }
            }
        }
        Err(UploadError::KeyExhausted {
            base_key: plan.candidate(0),
            attempts: MAX_KEY_ATTEMPTS,
        })
    }

    /// Insert the component row in its own transaction.
    async fn record_component(
        &self,
        new: &NewSoftwareComponent,
    ) -> MetadataResult<SoftwareComponent> {
        let mut tx = self.metadata.begin().await?;
        match tx.insert_component(new).await {
            Ok(component) => {
                tx.commit().await?;
                Ok(component)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed insert failed");
                }
                Err(err)
            }
        }
    }

    /// Remove the blob a failed metadata write left behind.
    async fn compensate(&self, key: String, metadata_error: MetadataError) -> UploadError {
        warn!(
            object_key = %key,
            error = %metadata_error,
            stage = "compensate",
            "metadata write failed, deleting uploaded blob"
        );
        match self.blobs.delete(&key).await {
            Ok(()) => {
                info!(object_key = %key, stage = "compensated", "uploaded blob removed");
                match metadata_error {
                    MetadataError::UniqueViolation(detail) => {
                        error!(object_key = %key, "object key already recorded, key generation collided");
                        UploadError::UniqueConstraintViolation { key, detail }
                    }
                    source => UploadError::MetadataWriteFailed { key, source },
                }
            }
            Err(cleanup_error) => {
                error!(
                    orphaned_key = %key,
                    metadata_error = %metadata_error,
                    cleanup_error = %cleanup_error,
                    stage = "compensation_failed",
                    "blob left without metadata record"
                );
                UploadError::CompensationFailed {
                    key,
                    metadata_error,
                    cleanup_error,
                }
            }
        }
    }
}
