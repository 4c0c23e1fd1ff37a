use anyhow::{Context, Result};
use axum::Router;
use recipe_repository::{
    config::{AppConfig, BlobBackendKind},
    routes,
    services::{
        AppState, blob_store::BlobStore, disk_blob_store::DiskBlobStore,
        metadata_store::SqliteMetadataStore, s3_blob_store::S3BlobStore,
    },
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting recipe-repository with config: {:?}", cfg);

    // --- Initialize SQLite pool (lazy, so a down database does not block start-up) ---
    ensure_sqlite_parent_dir(&cfg.database_url)?;
    let store = Arc::new(
        SqliteMetadataStore::connect_lazy(&cfg.database_url, 5)
            .with_context(|| format!("invalid DATABASE_URL {}", cfg.database_url))?,
    );

    // --- Handle migration mode ---
    if migrate {
        store.ensure_schema().await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Blob backend ---
    let blobs: Arc<dyn BlobStore> = match cfg.blob_backend {
        BlobBackendKind::S3 => Arc::new(S3BlobStore::new(&cfg.s3)?),
        BlobBackendKind::Disk => Arc::new(DiskBlobStore::new(cfg.disk_bucket_dir())),
    };

    // --- Schema + bucket; degraded start unless strict ---
    if let Err(err) = store.ensure_schema().await {
        if cfg.strict_startup {
            return Err(err).context("ensuring database schema");
        }
        tracing::error!(error = %err, "could not ensure database schema; starting degraded");
    }
    if let Err(err) = blobs.ensure_bucket().await {
        if cfg.strict_startup {
            return Err(err).context("ensuring blob bucket");
        }
        tracing::error!(
            error = %err,
            backend = blobs.backend_name(),
            "could not ensure blob bucket; starting degraded"
        );
    }

    // --- Build router ---
    let state = AppState::new(store, blobs, cfg.max_upload_bytes);
    let app: Router = routes::routes::app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// SQLite creates the database file but not its directory.
fn ensure_sqlite_parent_dir(database_url: &str) -> Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}
