use crate::AppState;
use crate::api::error::AppError;
use crate::services::extractor::FileError;
use crate::utils::validation::{allowed_file, sanitize_filename};
use axum::{
    Json,
    extract::{Multipart, State},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use utoipa::ToSchema;

pub const UPLOAD_FIELD: &str = "files";
pub const UPLOAD_MESSAGE: &str = "Upload successful. Previous files were removed.";

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    pub saved_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub errors: Vec<FileError>,
}

/// Multipart form accepted by `POST /upload-file`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// One or more image files (png, jpg, jpeg, gif, bmp, tiff)
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
}

struct UploadPart {
    original_name: String,
    data: Bytes,
}

#[utoipa::path(
    post,
    path = "/upload-file",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Batch staged, previous batch removed", body = UploadResponse),
        (status = 400, description = "No files provided or none selected"),
        (status = 413, description = "Request body too large")
    ),
    tag = "upload"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut parts = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        parts.push(UploadPart {
            original_name,
            data,
        });
    }

    if parts.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }
    if parts.iter().all(|p| p.original_name.is_empty()) {
        return Err(AppError::BadRequest("No selected files".to_string()));
    }

    // Only one batch lives in the staging folder at a time
    state.staging.clear().await?;

    let mut saved_files = Vec::new();
    let mut errors = Vec::new();

    for part in parts {
        if !allowed_file(&part.original_name) {
            errors.push(FileError::new(part.original_name, "File type not allowed"));
            continue;
        }

        let filename = match sanitize_filename(&part.original_name) {
            Ok(name) => name,
            Err(e) => {
                errors.push(FileError::new(part.original_name, e.to_string()));
                continue;
            }
        };

        match state.staging.save(&filename, &part.data).await {
            Ok(_) => saved_files.push(filename),
            Err(e) => {
                warn!("Failed to stage {}: {}", filename, e);
                errors.push(FileError::new(part.original_name, e.to_string()));
            }
        }
    }

    info!(
        "📦 Staged {} file(s), rejected {}",
        saved_files.len(),
        errors.len()
    );

    Ok(Json(UploadResponse {
        message: UPLOAD_MESSAGE.to_string(),
        saved_files,
        errors,
    }))
}

#[utoipa::path(
    get,
    path = "/upload-file",
    responses(
        (status = 200, description = "Usage description of the upload endpoint")
    ),
    tag = "upload"
)]
pub async fn upload_usage() -> Json<Value> {
    Json(json!({
        "description": "File upload endpoint",
        "methods": ["POST", "GET"],
        "POST": {
            "parameters": {
                "files": "One or more files to upload"
            },
            "response": {
                "message": "Success message",
                "saved_files": "List of successfully uploaded filenames",
                "errors": "List of errors if any occurred"
            }
        }
    }))
}
