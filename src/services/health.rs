//! Backend reachability probes shared by the health endpoint and start-up.

use super::{blob_store::BlobStore, metadata_store::MetadataStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{backend} unreachable: {reason}")]
    BackendUnreachable {
        backend: &'static str,
        reason: String,
    },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Reachable,
    Unreachable,
}

#[derive(Serialize, Debug)]
pub struct ServiceStatuses {
    pub database: BackendStatus,
    pub blobstore: BackendStatus,
}

#[derive(Serialize, Debug)]
pub struct HealthReport {
    /// `ok` when every backend is reachable, `degraded` otherwise.
    pub status: &'static str,
    pub services: ServiceStatuses,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.services.database == BackendStatus::Reachable
            && self.services.blobstore == BackendStatus::Reachable
    }
}

pub async fn probe_database(metadata: &dyn MetadataStore) -> Result<(), ProbeError> {
    metadata
        .ping()
        .await
        .map_err(|err| ProbeError::BackendUnreachable {
            backend: "database",
            reason: err.to_string(),
        })
}

pub async fn probe_blobstore(blobs: &dyn BlobStore) -> Result<(), ProbeError> {
    blobs
        .ping()
        .await
        .map_err(|err| ProbeError::BackendUnreachable {
            backend: "blobstore",
            reason: err.to_string(),
        })
}

/// Probe both backends independently.
pub async fn check_backends(metadata: &dyn MetadataStore, blobs: &dyn BlobStore) -> HealthReport {
    let (database, blobstore) = tokio::join!(probe_database(metadata), probe_blobstore(blobs));

    let mut errors = Vec::new();
    let mut status_of = |probe: Result<(), ProbeError>, name: &str| match probe {
        Ok(()) => {
            info!("{} connection successful.", name);
            BackendStatus::Reachable
        }
        Err(err) => {
            error!("{}", err);
            errors.push(err.to_string());
            BackendStatus::Unreachable
        }
    };
    let services = ServiceStatuses {
        database: status_of(database, "Database"),
        blobstore: status_of(blobstore, "Blob store"),
    };

    let mut report = HealthReport {
        status: "ok",
        services,
        errors,
    };
    if !report.is_ok() {
        report.status = "degraded";
    }
    report
}
