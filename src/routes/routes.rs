//! Defines routes for the recipe repository.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET    /`       : liveness
//!   - `GET    /health` : backend reachability
//!
//! - **Collections**
//!   - `GET    /recipe-collections`             : list collections
//!   - `POST   /recipe-collections`             : create collection
//!   - `GET    /recipe-collections/{id}`        : fetch collection
//!   - `DELETE /recipe-collections/{id}`        : delete collection (cascades)
//!   - `PATCH  /recipe-collections/{id}/status` : change lifecycle status
//!   - `GET    /recipe-collections/{id}/recipes`: list recipes
//!   - `POST   /recipe-collections/{id}/recipes`: create recipe
//!
//! - **Recipes & components**
//!   - `GET    /recipes/{id}`                   : fetch recipe
//!   - `DELETE /recipes/{id}`                   : delete recipe (cascades)
//!   - `GET    /recipes/{id}/components`        : list components
//!   - `POST   /recipes/{id}/components/upload` : upload a component (multipart)
//!   - `GET    /components/{id}`                : fetch component metadata
//!   - `GET    /components/{id}/download`       : fetch component payload

use crate::{
    handlers::{
        component_handlers::{download_component, get_component, list_components, upload_component},
        health_handlers::{health, root},
        recipe_handlers::{
            create_collection, create_recipe, delete_collection, delete_recipe, get_collection,
            get_recipe, list_collections, list_recipes, update_collection_status,
        },
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

/// Room for multipart boundaries and the non-file form fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build and return the router for every endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // Collections
        .route(
            "/recipe-collections",
            get(list_collections).post(create_collection),
        )
        .route(
            "/recipe-collections/{id}",
            get(get_collection).delete(delete_collection),
        )
        .route(
            "/recipe-collections/{id}/status",
            patch(update_collection_status),
        )
        .route(
            "/recipe-collections/{id}/recipes",
            get(list_recipes).post(create_recipe),
        )
        // Recipes
        .route("/recipes/{id}", get(get_recipe).delete(delete_recipe))
        .route("/recipes/{id}/components", get(list_components))
        .route("/recipes/{id}/components/upload", post(upload_component))
        // Components
        .route("/components/{id}", get(get_component))
        .route("/components/{id}/download", get(download_component))
}

/// The full application: routes, upload-sized body limit and state.
pub fn app(state: AppState) -> Router {
    let body_limit = state
        .uploads
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
