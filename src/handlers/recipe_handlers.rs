//! HTTP handlers for recipe collections and recipes.
//!
//! Lifecycle workflow is out of scope; these endpoints create, read, list and
//! delete catalog entries so components have somewhere to live.

use crate::{
    errors::AppError,
    models::{
        recipe::NewRecipe,
        recipe_collection::{CollectionStatus, NewRecipeCollection},
    },
    services::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

/// Body of `PATCH /recipe-collections/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: CollectionStatus,
}

/// `POST /recipe-collections`
pub async fn create_collection(
    State(state): State<AppState>,
    Json(new): Json<NewRecipeCollection>,
) -> Result<impl IntoResponse, AppError> {
    if new.name.trim().is_empty() {
        return Err(AppError::bad_request("collection name must not be empty"));
    }
    if new.major_version < 0 || new.minor_version < 0 || new.patch_version < 0 {
        return Err(AppError::bad_request("version numbers must not be negative"));
    }
    let collection = state.catalog.create_collection(&new).await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// `GET /recipe-collections`
pub async fn list_collections(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.list_collections().await?))
}

/// `GET /recipe-collections/{id}`
pub async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.get_collection(id).await?))
}

/// `PATCH /recipe-collections/{id}/status`
pub async fn update_collection_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state.catalog.set_collection_status(id, update.status).await?,
    ))
}

/// `DELETE /recipe-collections/{id}`: cascades to recipes, components and blobs.
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.delete_collection(id).await?))
}

/// `POST /recipe-collections/{id}/recipes`
pub async fn create_recipe(
    State(state): State<AppState>,
    Path(collection_id): Path<i64>,
    Json(new): Json<NewRecipe>,
) -> Result<impl IntoResponse, AppError> {
    if new.name.trim().is_empty() || new.product_number.trim().is_empty() {
        return Err(AppError::bad_request(
            "recipe name and product_number must not be empty",
        ));
    }
    let recipe = state.catalog.create_recipe(collection_id, &new).await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

/// `GET /recipe-collections/{id}/recipes`
pub async fn list_recipes(
    State(state): State<AppState>,
    Path(collection_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.list_recipes(collection_id).await?))
}

/// `GET /recipes/{id}`
pub async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.get_recipe(id).await?))
}

/// `DELETE /recipes/{id}`: cascades to components and their blobs.
pub async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.delete_recipe(id).await?))
}
