#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::{Stream, stream};
use recipe_repository::{
    models::{
        component::{NewSoftwareComponent, SoftwareComponent},
        recipe::{NewRecipe, Recipe},
        recipe_collection::{NewRecipeCollection, RecipeCollection},
    },
    services::{
        blob_store::{BlobAttributes, BlobError, BlobResult, BlobStore, StoredBlob},
        disk_blob_store::DiskBlobStore,
        metadata_store::{MetadataError, MetadataResult, MetadataStore, MetadataTx, SqliteMetadataStore},
        object_key::ObjectKeyGenerator,
    },
};
use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

/// Temporary SQLite database plus disk blob store.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<SqliteMetadataStore>,
    pub blobs: Arc<RecordingBlobStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("recipes.db");
        let store = SqliteMetadataStore::connect_lazy(&format!("sqlite://{}", db_path.display()), 4)
            .unwrap();
        store.ensure_schema().await.unwrap();
        let blobs = RecordingBlobStore::new(DiskBlobStore::new(dir.path().join("blobs")));
        blobs.ensure_bucket().await.unwrap();
        Self {
            dir,
            store: Arc::new(store),
            blobs: Arc::new(blobs),
        }
    }

    pub async fn collection(&self, name: &str) -> RecipeCollection {
        let new: NewRecipeCollection =
            serde_json::from_value(serde_json::json!({ "name": name })).unwrap();
        self.store.create_collection(&new).await.unwrap()
    }

    pub async fn recipe(&self, collection_id: i64, name: &str) -> Recipe {
        let new = NewRecipe {
            name: name.to_string(),
            product_number: format!("PN-{name}"),
            recipe_version: "1.0".into(),
            instructions: None,
        };
        self.store.create_recipe(collection_id, &new).await.unwrap()
    }

    /// Collection plus a recipe under it.
    pub async fn recipe_in_new_collection(&self) -> Recipe {
        let collection = self.collection("Robot Line A").await;
        self.recipe(collection.id, "Weld Cell").await
    }

    /// Insert a recipe with a fixed id.
    pub async fn recipe_with_id(&self, id: i64) -> Recipe {
        let collection = self.collection("Robot Line B").await;
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO recipes (id, collection_id, name, product_number, recipe_version,
                                  created_at, updated_at)
             VALUES (?, ?, 'Paint Cell', 'PN-7', '1.0', ?, ?)",
        )
        .bind(id)
        .bind(collection.id)
        .bind(now)
        .bind(now)
        .execute(self.store.pool())
        .await
        .unwrap();
        self.store.get_recipe(id).await.unwrap()
    }

    pub async fn component_rows(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM software_components")
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
}

pub fn fixed_clock_keys() -> ObjectKeyGenerator {
    let at = fixed_time();
    ObjectKeyGenerator::with_clock(Arc::new(move || at))
}

/// Split `bytes` into small chunks, the way a multipart body arrives.
pub fn payload(bytes: &[u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let chunks: Vec<io::Result<Bytes>> = bytes
        .chunks(256)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    stream::iter(chunks)
}

pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Disk blob store that counts calls and can be told to fail.
pub struct RecordingBlobStore {
    inner: DiskBlobStore,
    pub fail_put: AtomicBool,
    pub fail_delete: AtomicBool,
    pub down: AtomicBool,
    pub puts: AtomicUsize,
    pub exists_checks: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl RecordingBlobStore {
    pub fn new(inner: DiskBlobStore) -> Self {
        Self {
            inner,
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            down: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            exists_checks: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
            + self.exists_checks.load(Ordering::SeqCst)
            + self.deleted.lock().unwrap().len()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.exists(key).await.unwrap()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, attributes: BlobAttributes) -> BlobResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(BlobError::Unreachable("injected put failure".into()));
        }
        self.inner.put(key, bytes, attributes).await
    }

    async fn get(&self, key: &str) -> BlobResult<StoredBlob> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BlobError::Unreachable("injected delete failure".into()));
        }
        self.inner.delete(key).await
    }

    async fn ensure_bucket(&self) -> BlobResult<()> {
        self.inner.ensure_bucket().await
    }

    async fn ping(&self) -> BlobResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BlobError::Unreachable("connection refused".into()));
        }
        self.inner.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "recording-disk"
    }
}

/// Metadata store whose inserts fail while `fail_insert` is set and whose
/// ping fails while `down` is set.
pub struct FaultyMetadataStore {
    inner: Arc<SqliteMetadataStore>,
    pub fail_insert: AtomicBool,
    pub down: AtomicBool,
}

impl FaultyMetadataStore {
    pub fn new(inner: Arc<SqliteMetadataStore>) -> Self {
        Self {
            inner,
            fail_insert: AtomicBool::new(true),
            down: AtomicBool::new(false),
        }
    }
}

struct FailingTx;

#[async_trait]
impl MetadataTx for FailingTx {
    async fn insert_component(
        &mut self,
        _component: &NewSoftwareComponent,
    ) -> MetadataResult<SoftwareComponent> {
        Err(MetadataError::Connection("injected insert failure".into()))
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadataStore {
    async fn get_recipe(&self, id: i64) -> MetadataResult<Recipe> {
        self.inner.get_recipe(id).await
    }

    async fn begin(&self) -> MetadataResult<Box<dyn MetadataTx>> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingTx));
        }
        self.inner.begin().await
    }

    async fn find_components_by_checksum(
        &self,
        checksum: &str,
    ) -> MetadataResult<Vec<SoftwareComponent>> {
        self.inner.find_components_by_checksum(checksum).await
    }

    async fn ping(&self) -> MetadataResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(MetadataError::Connection("connection refused".into()));
        }
        self.inner.ping().await
    }
}
