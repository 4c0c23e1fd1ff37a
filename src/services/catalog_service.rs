//! CatalogService: read, list and administrative operations over the
//! catalog. Deletes remove rows first and blobs second so no surviving row
//! ever references missing bytes; blobs that cannot be removed are reported.

use super::{
    blob_store::{BlobError, BlobStore, META_CHECKSUM, StoredBlob},
    checksum,
    metadata_store::{MetadataError, MetadataStore, SqliteMetadataStore},
};
use crate::models::{
    component::SoftwareComponent,
    recipe::{NewRecipe, Recipe},
    recipe_collection::{CollectionStatus, NewRecipeCollection, RecipeCollection},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("payload of component {component_id} is missing from the blob store (key `{key}`)")]
    BlobMissing { component_id: i64, key: String },
    #[error(
        "payload of component {component_id} does not match its checksum \
         (expected {expected}, got {actual})"
    )]
    IntegrityMismatch {
        component_id: i64,
        expected: String,
        actual: String,
    },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Outcome of a cascading delete.
#[derive(Debug, Serialize)]
pub struct DeleteReport {
    pub deleted_components: usize,
    pub removed_blobs: usize,
    /// Blobs whose rows are gone but which could not be deleted.
    pub orphaned_keys: Vec<String>,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<SqliteMetadataStore>,
    blobs: Arc<dyn BlobStore>,
}

impl CatalogService {
    pub fn new(store: Arc<SqliteMetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub async fn create_collection(
        &self,
        new: &NewRecipeCollection,
    ) -> CatalogResult<RecipeCollection> {
        let collection = self.store.create_collection(new).await?;
        info!(
            collection_id = collection.id,
            "Created recipe collection {} {}",
            collection.name,
            collection.full_version()
        );
        Ok(collection)
    }

    pub async fn list_collections(&self) -> CatalogResult<Vec<RecipeCollection>> {
        Ok(self.store.list_collections().await?)
    }

    pub async fn get_collection(&self, id: i64) -> CatalogResult<RecipeCollection> {
        Ok(self.store.get_collection(id).await?)
    }

    pub async fn set_collection_status(
        &self,
        id: i64,
        status: CollectionStatus,
    ) -> CatalogResult<RecipeCollection> {
        let collection = self.store.set_collection_status(id, status).await?;
        info!(collection_id = id, status = %status, "collection status changed");
        Ok(collection)
    }

    pub async fn delete_collection(&self, id: i64) -> CatalogResult<DeleteReport> {
        let keys = self.store.delete_collection(id).await?;
        info!(collection_id = id, components = keys.len(), "deleted recipe collection");
        Ok(self.remove_blobs(keys).await)
    }

    pub async fn create_recipe(&self, collection_id: i64, new: &NewRecipe) -> CatalogResult<Recipe> {
        let recipe = self.store.create_recipe(collection_id, new).await?;
        info!(
            recipe_id = recipe.id,
            collection_id,
            product_number = %recipe.product_number,
            "Created recipe {}",
            recipe.name
        );
        Ok(recipe)
    }

    pub async fn list_recipes(&self, collection_id: i64) -> CatalogResult<Vec<Recipe>> {
        Ok(self.store.list_recipes(collection_id).await?)
    }

    pub async fn get_recipe(&self, id: i64) -> CatalogResult<Recipe> {
        Ok(self.store.get_recipe(id).await?)
    }

    pub async fn delete_recipe(&self, id: i64) -> CatalogResult<DeleteReport> {
        let keys = self.store.delete_recipe(id).await?;
        info!(recipe_id = id, components = keys.len(), "deleted recipe");
        Ok(self.remove_blobs(keys).await)
    }

    pub async fn list_components(&self, recipe_id: i64) -> CatalogResult<Vec<SoftwareComponent>> {
        Ok(self.store.list_components(recipe_id).await?)
    }

    pub async fn get_component(&self, id: i64) -> CatalogResult<SoftwareComponent> {
        Ok(self.store.get_component(id).await?)
    }

    /// Fetch a component's payload and check it against the recorded checksum.
    ///
    /// The relational record is authoritative; side metadata on the blob that
    /// disagrees with it is only logged.
    pub async fn download_component(
        &self,
        id: i64,
    ) -> CatalogResult<(SoftwareComponent, StoredBlob)> {
        let component = self.store.get_component(id).await?;
        let blob = match self.blobs.get(&component.object_key).await {
            Ok(blob) => blob,
            Err(BlobError::NotFound(key)) => {
                error!(component_id = id, object_key = %key, "component payload missing");
                return Err(CatalogError::BlobMissing {
                    component_id: id,
                    key,
                });
            }
            Err(err) => return Err(err.into()),
        };

        if !checksum::verify(&blob.bytes, &component.checksum) {
            let actual = checksum::sha256_hex(&blob.bytes);
            error!(
                component_id = id,
                object_key = %component.object_key,
                expected = %component.checksum,
                actual = %actual,
                "stored payload failed checksum verification"
            );
            return Err(CatalogError::IntegrityMismatch {
                component_id: id,
                expected: component.checksum,
                actual,
            });
        }

        if let Some(side) = blob.attributes.metadata.get(META_CHECKSUM) {
            if !side.eq_ignore_ascii_case(&component.checksum) {
                warn!(
                    component_id = id,
                    object_key = %component.object_key,
                    side_checksum = %side,
                    "blob side metadata disagrees with component record"
                );
            }
        }
        Ok((component, blob))
    }

    /// Delete the blobs of already-deleted rows, collecting the ones that stay behind.
    async fn remove_blobs(&self, keys: Vec<String>) -> DeleteReport {
        let deleted_components = keys.len();
        let mut orphaned_keys = Vec::new();
        for key in keys {
            if let Err(err) = self.blobs.delete(&key).await {
                error!(orphaned_key = %key, error = %err, "failed to delete blob of deleted component");
                orphaned_keys.push(key);
            }
        }
        DeleteReport {
            deleted_components,
            removed_blobs: deleted_components - orphaned_keys.len(),
            orphaned_keys,
        }
    }
}
