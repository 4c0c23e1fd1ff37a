//! Core data models for the recipe repository.
//!
//! Collections own recipes and recipes own software components; ownership is
//! enforced by foreign keys with cascading deletes. The entities map to tables
//! via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod component;
pub mod recipe;
pub mod recipe_collection;
