//! Represents a software component: one binary artifact linked to a recipe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A binary artifact whose payload lives in the blob store.
///
/// The record stores the object key and the SHA-256 of the exact bytes stored
/// under it. Components are only created by the upload path and are never
/// modified afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct SoftwareComponent {
    /// Store-assigned identifier.
    pub id: i64,

    /// Owning recipe.
    pub recipe_id: i64,

    /// Free-form category tag (e.g. `robot_firmware`, `camera_config`).
    pub component_type: String,

    /// Key of the payload in the blob store. Unique across all components.
    #[serde(rename = "minio_object_key")]
    pub object_key: String,

    /// Lowercase hex SHA-256 of the stored payload.
    pub checksum: String,

    /// Filename as supplied by the uploader.
    pub original_filename: String,

    /// Payload size in bytes.
    pub file_size_bytes: i64,

    /// When the payload was accepted; also embedded in the object key.
    pub upload_timestamp: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A component row that has not been persisted yet.
#[derive(Clone, Debug)]
pub struct NewSoftwareComponent {
    pub recipe_id: i64,
    pub component_type: String,
    pub object_key: String,
    pub checksum: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub upload_timestamp: DateTime<Utc>,
}
