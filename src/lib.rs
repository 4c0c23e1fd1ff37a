//! Recipe repository: recipe collections, recipes, and the software
//! components (binaries) linked to them. Binaries live in a blob store,
//! their metadata in SQLite; uploads write the blob first and compensate
//! if the metadata write fails.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
