//! Represents a recipe: the set of artifacts needed to build one product.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A recipe inside a collection.
///
/// Owns its software components; deleting the recipe deletes them too.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Recipe {
    /// Store-assigned identifier.
    pub id: i64,

    /// Owning collection.
    pub collection_id: i64,

    pub name: String,

    /// External product identifier (e.g. `XYZ-1234`).
    pub product_number: String,

    /// Recipe-local version string.
    pub recipe_version: String,

    /// Free-form instructions payload.
    pub instructions: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a recipe.
#[derive(Deserialize, Clone, Debug)]
pub struct NewRecipe {
    pub name: String,
    pub product_number: String,
    #[serde(default = "default_recipe_version")]
    pub recipe_version: String,
    pub instructions: Option<String>,
}

fn default_recipe_version() -> String {
    "1.0".into()
}
