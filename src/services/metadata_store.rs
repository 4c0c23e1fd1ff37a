//! Metadata store adapter: relational persistence for collections, recipes
//! and software components, backed by SQLite through `sqlx`.
//!
//! The upload path only needs [`MetadataStore`]: look up a recipe, open a
//! transaction, insert a component, commit or roll back. Catalog
//! administration and read endpoints use the inherent methods on
//! [`SqliteMetadataStore`].

use crate::models::{
    component::{NewSoftwareComponent, SoftwareComponent},
    recipe::{NewRecipe, Recipe},
    recipe_collection::{CollectionStatus, NewRecipeCollection, RecipeCollection},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

const COLLECTION_COLUMNS: &str = "id, name, description, major_version, minor_version, \
     patch_version, status, release_date, author, created_at, updated_at";
const RECIPE_COLUMNS: &str = "id, collection_id, name, product_number, recipe_version, \
     instructions, created_at, updated_at";
const COMPONENT_COLUMNS: &str = "id, recipe_id, component_type, object_key, checksum, \
     original_filename, file_size_bytes, upload_timestamp, created_at, updated_at";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),
    #[error("metadata store connection error: {0}")]
    Connection(String),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::UniqueViolation(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ForeignKeyViolation(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connection(err.to_string()),
            _ => Self::Sqlx(err),
        }
    }
}

impl MetadataError {
    fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// The operations the upload path and health checks rely on.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a recipe, `NotFound` if absent.
    async fn get_recipe(&self, id: i64) -> MetadataResult<Recipe>;

    /// Open a write transaction. Dropping it without commit rolls back.
    async fn begin(&self) -> MetadataResult<Box<dyn MetadataTx>>;

    /// Components whose payload hashes to `checksum`.
    async fn find_components_by_checksum(
        &self,
        checksum: &str,
    ) -> MetadataResult<Vec<SoftwareComponent>>;

    /// Cheap reachability probe (`SELECT 1`).
    async fn ping(&self) -> MetadataResult<()>;
}

/// A write transaction owned by the caller.
#[async_trait]
pub trait MetadataTx: Send {
    async fn insert_component(
        &mut self,
        component: &NewSoftwareComponent,
    ) -> MetadataResult<SoftwareComponent>;

    async fn commit(self: Box<Self>) -> MetadataResult<()>;

    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}

/// SQLite-backed metadata store.
#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteMetadataStore {
    /// Create a pool for `database_url` without connecting yet, so start-up can
    /// proceed while the store is unreachable.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(opts);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn ensure_schema(&self) -> MetadataResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} schema statements...", statements.len());

        for stmt in statements {
            tracing::debug!("Executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // --- collections ---

    pub async fn create_collection(
        &self,
        new: &NewRecipeCollection,
    ) -> MetadataResult<RecipeCollection> {
        let now = Utc::now();
        let release_date = (new.status == CollectionStatus::Released).then_some(now);
        let sql = format!(
            "INSERT INTO recipe_collections (
                name, description, major_version, minor_version, patch_version,
                status, release_date, author, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COLLECTION_COLUMNS}"
        );
        let collection = sqlx::query_as::<_, RecipeCollection>(&sql)
            .bind(&new.name)
            .bind(&new.description)
            .bind(new.major_version)
            .bind(new.minor_version)
            .bind(new.patch_version)
            .bind(new.status)
            .bind(release_date)
            .bind(&new.author)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(collection)
    }

    pub async fn get_collection(&self, id: i64) -> MetadataResult<RecipeCollection> {
        let sql = format!("SELECT {COLLECTION_COLUMNS} FROM recipe_collections WHERE id = ?");
        sqlx::query_as::<_, RecipeCollection>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::not_found("recipe collection", id))
    }

    pub async fn list_collections(&self) -> MetadataResult<Vec<RecipeCollection>> {
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM recipe_collections
             ORDER BY name ASC, major_version DESC, minor_version DESC, patch_version DESC"
        );
        Ok(sqlx::query_as::<_, RecipeCollection>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Change a collection's status. `release_date` is stamped only when the
    /// collection moves into `RELEASED` from another status.
    pub async fn set_collection_status(
        &self,
        id: i64,
        status: CollectionStatus,
    ) -> MetadataResult<RecipeCollection> {
        let mut tx = self.pool.begin().await?;
        let (current, release_date): (CollectionStatus, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT status, release_date FROM recipe_collections WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::not_found("recipe collection", id))?;

        let now = Utc::now();
        let release_date = if status == CollectionStatus::Released
            && current != CollectionStatus::Released
        {
            Some(now)
        } else {
            release_date
        };
        let sql = format!(
            "UPDATE recipe_collections SET status = ?, release_date = ?, updated_at = ?
             WHERE id = ? RETURNING {COLLECTION_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, RecipeCollection>(&sql)
            .bind(status)
            .bind(release_date)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Delete a collection with its recipes and components. Returns the object
    /// keys of every deleted component so their blobs can be removed.
    pub async fn delete_collection(&self, id: i64) -> MetadataResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT c.object_key FROM software_components c
             JOIN recipes r ON r.id = c.recipe_id
             WHERE r.collection_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM recipe_collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::not_found("recipe collection", id));
        }
        tx.commit().await?;
        Ok(keys)
    }

    // --- recipes ---

    pub async fn create_recipe(
        &self,
        collection_id: i64,
        new: &NewRecipe,
    ) -> MetadataResult<Recipe> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO recipes (
                collection_id, name, product_number, recipe_version, instructions,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {RECIPE_COLUMNS}"
        );
        sqlx::query_as::<_, Recipe>(&sql)
            .bind(collection_id)
            .bind(&new.name)
            .bind(&new.product_number)
            .bind(&new.recipe_version)
            .bind(&new.instructions)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match MetadataError::from(err) {
                MetadataError::ForeignKeyViolation(_) => {
                    MetadataError::not_found("recipe collection", collection_id)
                }
                other => other,
            })
    }

    pub async fn list_recipes(&self, collection_id: i64) -> MetadataResult<Vec<Recipe>> {
        self.get_collection(collection_id).await?;
        let sql =
            format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE collection_id = ? ORDER BY id ASC");
        Ok(sqlx::query_as::<_, Recipe>(&sql)
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Delete a recipe with its components, returning the deleted object keys.
    pub async fn delete_recipe(&self, id: i64) -> MetadataResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT object_key FROM software_components WHERE recipe_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM recipes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::not_found("recipe", id));
        }
        tx.commit().await?;
        Ok(keys)
    }

    // --- components ---

    pub async fn get_component(&self, id: i64) -> MetadataResult<SoftwareComponent> {
        let sql = format!("SELECT {COMPONENT_COLUMNS} FROM software_components WHERE id = ?");
        sqlx::query_as::<_, SoftwareComponent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::not_found("software component", id))
    }

    pub async fn list_components(&self, recipe_id: i64) -> MetadataResult<Vec<SoftwareComponent>> {
        self.get_recipe(recipe_id).await?;
        let sql = format!(
            "SELECT {COMPONENT_COLUMNS} FROM software_components
             WHERE recipe_id = ? ORDER BY upload_timestamp ASC, id ASC"
        );
        Ok(sqlx::query_as::<_, SoftwareComponent>(&sql)
            .bind(recipe_id)
            .fetch_all(&self.pool)
            .await?)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_recipe(&self, id: i64) -> MetadataResult<Recipe> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?");
        sqlx::query_as::<_, Recipe>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::not_found("recipe", id))
    }

    async fn begin(&self) -> MetadataResult<Box<dyn MetadataTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn find_components_by_checksum(
        &self,
        checksum: &str,
    ) -> MetadataResult<Vec<SoftwareComponent>> {
        let sql = format!(
            "SELECT {COMPONENT_COLUMNS} FROM software_components WHERE checksum = ? ORDER BY id ASC"
        );
        Ok(sqlx::query_as::<_, SoftwareComponent>(&sql)
            .bind(checksum)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn ping(&self) -> MetadataResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(1) => Ok(()),
            Ok(v) => Err(MetadataError::Connection(format!("unexpected result: {v}"))),
            Err(err) => Err(MetadataError::Connection(err.to_string())),
        }
    }
}

#[async_trait]
impl MetadataTx for SqliteTx {
    async fn insert_component(
        &mut self,
        component: &NewSoftwareComponent,
    ) -> MetadataResult<SoftwareComponent> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO software_components (
                recipe_id, component_type, object_key, checksum, original_filename,
                file_size_bytes, upload_timestamp, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COMPONENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SoftwareComponent>(&sql)
            .bind(component.recipe_id)
            .bind(&component.component_type)
            .bind(&component.object_key)
            .bind(&component.checksum)
            .bind(&component.original_filename)
            .bind(component.file_size_bytes)
            .bind(component.upload_timestamp)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> MetadataResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    async fn test_store() -> (SqliteMetadataStore, TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("catalog.db").display());
        let store = SqliteMetadataStore::connect_lazy(&url, 4).unwrap();
        store.ensure_schema().await.unwrap();
        (store, dir)
    }

    fn collection(name: &str) -> NewRecipeCollection {
        NewRecipeCollection {
            name: name.into(),
            description: None,
            major_version: 1,
            minor_version: 0,
            patch_version: 0,
            status: CollectionStatus::Draft,
            author: Some("qa".into()),
        }
    }

    fn recipe() -> NewRecipe {
        NewRecipe {
            name: "gripper".into(),
            product_number: "XYZ-1234".into(),
            recipe_version: "1.0".into(),
            instructions: None,
        }
    }

    fn component(recipe_id: i64, key: &str) -> NewSoftwareComponent {
        NewSoftwareComponent {
            recipe_id,
            component_type: "robot_firmware".into(),
            object_key: key.into(),
            checksum: "a".repeat(64),
            original_filename: "fw.bin".into(),
            file_size_bytes: 3,
            upload_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let (store, _dir) = test_store().await;
        store.ensure_schema().await.unwrap();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn missing_recipe_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store.get_recipe(7).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound { entity: "recipe", id: 7 }));
    }

    #[tokio::test]
    async fn collection_version_is_unique() {
        let (store, _dir) = test_store().await;
        store.create_collection(&collection("line-4")).await.unwrap();
        let err = store
            .create_collection(&collection("line-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::UniqueViolation(_)));

        let mut next = collection("line-4");
        next.patch_version = 1;
        let created = store.create_collection(&next).await.unwrap();
        assert_eq!(created.full_version(), "1.0.1");
    }

    #[tokio::test]
    async fn release_date_set_on_transition_into_released() {
        let (store, _dir) = test_store().await;
        let created = store.create_collection(&collection("line-4")).await.unwrap();
        assert!(created.release_date.is_none());

        let approved = store
            .set_collection_status(created.id, CollectionStatus::Approved)
            .await
            .unwrap();
        assert!(approved.release_date.is_none());

        let released = store
            .set_collection_status(created.id, CollectionStatus::Released)
            .await
            .unwrap();
        let stamped = released.release_date.expect("release date");

        let again = store
            .set_collection_status(created.id, CollectionStatus::Released)
            .await
            .unwrap();
        assert_eq!(again.release_date, Some(stamped));

        let archived = store
            .set_collection_status(created.id, CollectionStatus::Archived)
            .await
            .unwrap();
        assert_eq!(archived.status, CollectionStatus::Archived);
        assert_eq!(archived.release_date, Some(stamped));
    }

    #[tokio::test]
    async fn insert_component_in_transaction() {
        let (store, _dir) = test_store().await;
        let coll = store.create_collection(&collection("line-4")).await.unwrap();
        let rec = store.create_recipe(coll.id, &recipe()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let row = tx
            .insert_component(&component(rec.id, "robot_firmware/1_fw.bin"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(row.recipe_id, rec.id);
        assert_eq!(store.get_component(row.id).await.unwrap().object_key, "robot_firmware/1_fw.bin");
        assert_eq!(
            store.find_components_by_checksum(&"a".repeat(64)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn rollback_discards_insert() {
        let (store, _dir) = test_store().await;
        let coll = store.create_collection(&collection("line-4")).await.unwrap();
        let rec = store.create_recipe(coll.id, &recipe()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_component(&component(rec.id, "robot_firmware/1_fw.bin"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.list_components(rec.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_object_key_is_unique_violation() {
        let (store, _dir) = test_store().await;
        let coll = store.create_collection(&collection("line-4")).await.unwrap();
        let rec = store.create_recipe(coll.id, &recipe()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_component(&component(rec.id, "k/1_a.bin")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_component(&component(rec.id, "k/1_a.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn deleting_collection_cascades() {
        let (store, _dir) = test_store().await;
        let coll = store.create_collection(&collection("line-4")).await.unwrap();
        let rec = store.create_recipe(coll.id, &recipe()).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let comp = tx.insert_component(&component(rec.id, "k/1_a.bin")).await.unwrap();
        tx.commit().await.unwrap();

        let keys = store.delete_collection(coll.id).await.unwrap();
        assert_eq!(keys, vec!["k/1_a.bin".to_string()]);
        assert!(matches!(
            store.get_recipe(rec.id).await,
            Err(MetadataError::NotFound { .. })
        ));
        assert!(matches!(
            store.get_component(comp.id).await,
            Err(MetadataError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete_collection(coll.id).await,
            Err(MetadataError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn recipe_requires_existing_collection() {
        let (store, _dir) = test_store().await;
        let err = store.create_recipe(99, &recipe()).await.unwrap_err();
        assert!(matches!(
            err,
            MetadataError::NotFound { entity: "recipe collection", id: 99 }
        ));
    }
}
