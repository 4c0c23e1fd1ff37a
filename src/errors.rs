use crate::services::{
    blob_store::BlobError,
    catalog_service::CatalogError,
    metadata_store::MetadataError,
    upload_service::UploadError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// Error returned by handlers, rendered as a JSON body.
///
/// `code` names the failure class; `details` carries structured context such
/// as the object key of a failed upload and whether partial state remains.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "ValidationError", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match &err {
            MetadataError::NotFound { .. } => AppError::not_found(err.to_string()),
            MetadataError::UniqueViolation(_) => {
                AppError::new(StatusCode::CONFLICT, "Conflict", err.to_string())
            }
            MetadataError::Connection(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "BackendUnreachable",
                err.to_string(),
            ),
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match &err {
            BlobError::NotFound(_) => AppError::not_found(err.to_string()),
            BlobError::Unreachable(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "BackendUnreachable",
                err.to_string(),
            ),
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Metadata(err) => err.into(),
            CatalogError::Blob(err) => err.into(),
            CatalogError::BlobMissing { ref key, .. } => {
                let details = json!({ "object_key": key });
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "BlobMissing",
                    err.to_string(),
                )
                .with_details(details)
            }
            CatalogError::IntegrityMismatch { .. } => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "IntegrityMismatch",
                err.to_string(),
            ),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::RecipeNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::Validation(_) | UploadError::PayloadRead(_) => StatusCode::BAD_REQUEST,
            UploadError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::MetadataUnavailable(_)
            | UploadError::KeyExhausted { .. }
            | UploadError::StorageWriteFailed { .. }
            | UploadError::MetadataWriteFailed { .. }
            | UploadError::UniqueConstraintViolation { .. }
            | UploadError::CompensationFailed { .. }
            | UploadError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = err.object_key().map(|key| {
            json!({
                "object_key": key,
                "partial_state": err.partial_state(),
                "orphaned_key": err.orphaned_key(),
            })
        });
        let app = AppError::new(status, err.kind(), err.to_string());
        match details {
            Some(details) => app.with_details(details),
            None => app,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_map_to_statuses() {
        let not_found: AppError = UploadError::RecipeNotFound(7).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert!(not_found.details.is_none());

        let too_large: AppError = UploadError::PayloadTooLarge { limit: 10 }.into();
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

        let orphan: AppError = UploadError::CompensationFailed {
            key: "fw/1_a.bin".into(),
            metadata_error: MetadataError::Connection("down".into()),
            cleanup_error: BlobError::Unreachable("down".into()),
        }
        .into();
        assert_eq!(orphan.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(orphan.code, "CompensationFailed");
        let details = orphan.details.unwrap();
        assert_eq!(details["orphaned_key"], "fw/1_a.bin");
        assert_eq!(details["partial_state"], true);
    }

    #[test]
    fn clean_metadata_failure_reports_no_partial_state() {
        let err: AppError = UploadError::MetadataWriteFailed {
            key: "fw/1_a.bin".into(),
            source: MetadataError::Connection("down".into()),
        }
        .into();
        let details = err.details.unwrap();
        assert_eq!(details["object_key"], "fw/1_a.bin");
        assert_eq!(details["partial_state"], false);
        assert!(details["orphaned_key"].is_null());
    }

    #[test]
    fn metadata_errors_map_to_statuses() {
        let err: AppError = MetadataError::NotFound {
            entity: "recipe",
            id: 1,
        }
        .into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: AppError = MetadataError::UniqueViolation("dup".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
