#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::StreamExt;
use http_body_util::BodyExt;
use image_extract_backend::config::AppConfig;
use image_extract_backend::services::vision::{DeltaStream, ModelError, VisionModel, VisionRequest};
use image_extract_backend::{AppState, create_app};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

/// Answers with the staged file's own bytes, so each test image carries the
/// model response it should produce. Content starting with `fail:` turns
/// into an API error carrying the rest as the body.
#[derive(Default)]
pub struct ScriptedModel {
    pub calls: AtomicUsize,
    pub streamed_calls: AtomicUsize,
}

impl ScriptedModel {
    fn answer(request: &VisionRequest) -> Result<String, ModelError> {
        let (_, payload) = request
            .image_url
            .split_once(";base64,")
            .ok_or_else(|| ModelError::Malformed("not a data URL".to_string()))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        match text.strip_prefix("fail:") {
            Some(body) => Err(ModelError::Api {
                status: 500,
                body: body.to_string(),
            }),
            None => Ok(text),
        }
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Self::answer(request)
    }

    async fn complete_streaming(&self, request: &VisionRequest) -> Result<DeltaStream, ModelError> {
        self.streamed_calls.fetch_add(1, Ordering::SeqCst);
        let text = Self::answer(request)?;

        let chunks: Vec<Result<String, ModelError>> = text
            .chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Scripted answers, but every call first deletes `victim` from disk, so a
/// file listed for the batch is gone by the time it is read.
pub struct RemovingModel {
    pub inner: ScriptedModel,
    pub victim: PathBuf,
}

impl RemovingModel {
    pub fn new(victim: PathBuf) -> Self {
        Self {
            inner: ScriptedModel::default(),
            victim,
        }
    }

    fn remove_victim(&self) {
        let _ = std::fs::remove_file(&self.victim);
    }
}

#[async_trait]
impl VisionModel for RemovingModel {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ModelError> {
        self.remove_victim();
        self.inner.complete(request).await
    }

    async fn complete_streaming(&self, request: &VisionRequest) -> Result<DeltaStream, ModelError> {
        self.remove_victim();
        self.inner.complete_streaming(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub fn test_app(upload_folder: &Path) -> (Router, Arc<ScriptedModel>) {
    let model = Arc::new(ScriptedModel::default());
    (test_app_with(upload_folder, model.clone()), model)
}

pub fn test_app_with(upload_folder: &Path, model: Arc<dyn VisionModel>) -> Router {
    let config = AppConfig::for_tests(upload_folder, "http://127.0.0.1:9");
    create_app(AppState::new(config, model))
}

/// `(field name, filename, content)` parts as a multipart/form-data body.
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, filename, content) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or_else(|e| {
        panic!("invalid JSON body ({}): {}", e, String::from_utf8_lossy(&body))
    })
}

/// Splits an event-stream body into the JSON payload of each `data:` frame.
pub async fn sse_events(response: axum::response::Response) -> Vec<Value> {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();

    text.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        // keep-alive comments
        .filter(|frame| !frame.starts_with(':'))
        .map(|frame| {
            let data = frame
                .strip_prefix("data: ")
                .or_else(|| frame.strip_prefix("data:"))
                .unwrap_or_else(|| panic!("unexpected frame: {frame:?}"));
            serde_json::from_str(data).unwrap()
        })
        .collect()
}

pub fn staged_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
