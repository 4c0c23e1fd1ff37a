pub mod component_handlers;
pub mod health_handlers;
pub mod recipe_handlers;
