//! HTTP handlers for software components: upload, read, list and download.

use crate::{
    errors::AppError,
    services::{
        AppState,
        upload_service::{UploadError, UploadRequest},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::io;

/// Response header carrying the payload digest on downloads.
pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

const COMPONENT_TYPE_FIELD: &str = "component_type";
const FILE_FIELD: &str = "file";

/// `POST /recipes/{recipe_id}/components/upload`
///
/// Multipart form with `component_type` and `file`. When `component_type`
/// precedes `file` the payload is streamed into the upload; otherwise the file
/// part is buffered (within the upload limit) until the type arrives.
pub async fn upload_component(
    State(state): State<AppState>,
    Path(recipe_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let limit = state.uploads.max_upload_bytes();
    let mut component_type: Option<String> = None;
    let mut buffered: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(COMPONENT_TYPE_FIELD) => {
                component_type = Some(field.text().await.map_err(multipart_error)?);
            }
            Some(FILE_FIELD) => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("`file` part has no filename"))?;
                let content_type = field.content_type().map(str::to_string);

                let Some(component_type) = component_type.clone() else {
                    let bytes = read_field_bounded(field, limit).await?;
                    buffered = Some((file_name, content_type, bytes));
                    continue;
                };

                let request = UploadRequest {
                    recipe_id,
                    component_type,
                    file_name,
                    content_type,
                };
                let payload = field.map(|chunk| chunk.map_err(io::Error::other));
                let component = state.uploads.upload_component(request, payload).await?;
                return Ok((StatusCode::CREATED, Json(component)));
            }
            _ => {}
        }
    }

    let component_type = component_type
        .ok_or_else(|| AppError::bad_request("missing `component_type` form field"))?;
    let (file_name, content_type, bytes) =
        buffered.ok_or_else(|| AppError::bad_request("missing `file` form field"))?;

    let request = UploadRequest {
        recipe_id,
        component_type,
        file_name,
        content_type,
    };
    let payload = stream::once(async move { Ok::<_, io::Error>(bytes) });
    let component = state.uploads.upload_component(request, payload).await?;
    Ok((StatusCode::CREATED, Json(component)))
}

/// `GET /recipes/{recipe_id}/components`
pub async fn list_components(
    State(state): State<AppState>,
    Path(recipe_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.list_components(recipe_id).await?))
}

/// `GET /components/{id}`
pub async fn get_component(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.catalog.get_component(id).await?))
}

/// `GET /components/{id}/download`: payload bytes, verified against the record.
pub async fn download_component(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (component, blob) = state.catalog.download_component(id).await?;
    let content_type = blob.content_type().to_string();
    let length = blob.bytes.len();

    let mut response = Response::new(Body::from(blob.bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    set_download_headers(headers, &content_type, length, &component.checksum);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        component.original_filename.replace('"', "")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, content_type: &str, length: usize, checksum: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(checksum) {
        headers.insert(HeaderName::from_static(CHECKSUM_HEADER), value);
    }
}

async fn read_field_bounded(mut field: Field<'_>, limit: usize) -> Result<Bytes, AppError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if buffer.len() + chunk.len() > limit {
            return Err(UploadError::PayloadTooLarge { limit }.into());
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

fn multipart_error(err: MultipartError) -> AppError {
    let code = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "PayloadTooLarge"
    } else {
        "ValidationError"
    };
    AppError::new(err.status(), code, err.body_text())
}
