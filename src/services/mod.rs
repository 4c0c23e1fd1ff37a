//! Services: blob backends, metadata store, and the orchestration built on them.

pub mod blob_store;
pub mod catalog_service;
pub mod checksum;
pub mod disk_blob_store;
pub mod health;
pub mod metadata_store;
pub mod object_key;
pub mod s3_blob_store;
pub mod upload_service;

use self::{
    blob_store::BlobStore,
    catalog_service::CatalogService,
    metadata_store::{MetadataStore, SqliteMetadataStore},
    upload_service::UploadService,
};
use std::sync::Arc;

/// Shared state handed to every handler. Built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub uploads: UploadService,
    pub catalog: CatalogService,
}

impl AppState {
    pub fn new(store: Arc<SqliteMetadataStore>, blobs: Arc<dyn BlobStore>, max_upload_bytes: usize) -> Self {
        let metadata: Arc<dyn MetadataStore> = store.clone();
        Self {
            uploads: UploadService::new(metadata.clone(), blobs.clone(), max_upload_bytes),
            catalog: CatalogService::new(store, blobs.clone()),
            metadata,
            blobs,
        }
    }
}
