//! Represents a recipe collection: a named, semantically versioned group of recipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle status of a recipe collection.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum CollectionStatus {
    #[default]
    Draft,
    Approved,
    Released,
    Archived,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Approved => "APPROVED",
            Self::Released => "RELEASED",
            Self::Archived => "ARCHIVED",
        };
        f.write_str(s)
    }
}

/// A versioned grouping of recipes.
///
/// `(name, major_version, minor_version, patch_version)` is unique across the
/// catalog. Deleting a collection deletes its recipes and, transitively, their
/// components.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct RecipeCollection {
    /// Store-assigned identifier.
    pub id: i64,

    /// Human readable collection name.
    pub name: String,

    /// Optional free-form description.
    pub description: Option<String>,

    pub major_version: i64,
    pub minor_version: i64,
    pub patch_version: i64,

    /// Current lifecycle status.
    pub status: CollectionStatus,

    /// Set when the collection transitions into `RELEASED`.
    pub release_date: Option<DateTime<Utc>>,

    /// Who authored this collection.
    pub author: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecipeCollection {
    /// `major.minor.patch` rendering of the version triple.
    pub fn full_version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.major_version, self.minor_version, self.patch_version
        )
    }
}

/// Fields accepted when creating a collection.
#[derive(Deserialize, Clone, Debug)]
pub struct NewRecipeCollection {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_major")]
    pub major_version: i64,
    #[serde(default)]
    pub minor_version: i64,
    #[serde(default)]
    pub patch_version: i64,
    #[serde(default)]
    pub status: CollectionStatus,
    pub author: Option<String>,
}

fn default_major() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&CollectionStatus::Released).unwrap();
        assert_eq!(json, "\"RELEASED\"");
        let parsed: CollectionStatus = serde_json::from_str("\"ARCHIVED\"").unwrap();
        assert_eq!(parsed, CollectionStatus::Archived);
    }

    #[test]
    fn new_collection_defaults_to_one_zero_zero_draft() {
        let new: NewRecipeCollection = serde_json::from_str(r#"{"name":"line-4"}"#).unwrap();
        assert_eq!(
            (new.major_version, new.minor_version, new.patch_version),
            (1, 0, 0)
        );
        assert_eq!(new.status, CollectionStatus::Draft);
    }
}
