use crate::services::staging::StagedFile;
use crate::services::vision::{ModelError, VisionModel, VisionRequest};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::StreamExt;
use mime::Mime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use utoipa::ToSchema;

const TEXT_SYSTEM_PROMPT: &str = "You are a helpful assistant that extracts information from documents.";
const TEXT_USER_PROMPT: &str = "Extract all the text from this image exactly as it appears, preserving the original formatting, line breaks, and punctuation. Do not interpret or structure the text, just return it exactly as it appears in the image.";
const STRUCTURED_SYSTEM_PROMPT: &str = "You are a helpful assistant that extracts key-value pairs from documents. Return only a valid JSON object with no explanation or markdown formatting.";
const STRUCTURED_USER_PROMPT: &str = "Extract key-value pairs from this image and return a valid JSON object.";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Model(#[from] ModelError),
}

/// What the model is asked to produce for each image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Verbatim transcription, returned as-is
    RawText,
    /// Key-value pairs as a JSON object, cleaned and parsed
    Structured,
}

impl ExtractionMode {
    pub fn system_prompt(self) -> &'static str {
        match self {
            ExtractionMode::RawText => TEXT_SYSTEM_PROMPT,
            ExtractionMode::Structured => STRUCTURED_SYSTEM_PROMPT,
        }
    }

    pub fn user_prompt(self) -> &'static str {
        match self {
            ExtractionMode::RawText => TEXT_USER_PROMPT,
            ExtractionMode::Structured => STRUCTURED_USER_PROMPT,
        }
    }

    /// Turns the model's complete answer into the value reported for a file.
    pub fn finish(self, response: &str) -> Value {
        match self {
            ExtractionMode::RawText => Value::String(response.to_string()),
            ExtractionMode::Structured => clean_json_response(response),
        }
    }
}

static RE_JSON_FENCES: Lazy<Regex> = Lazy::new(|| Regex::new(r"```json\s*|\s*```").unwrap());

/// Strips ```json fences, trims, and parses the rest as JSON. Text that
/// still is not JSON comes back as a string.
pub fn clean_json_response(response: &str) -> Value {
    let stripped = RE_JSON_FENCES.replace_all(response, "");
    let cleaned = stripped.trim();

    serde_json::from_str(cleaned).unwrap_or_else(|_| Value::String(cleaned.to_string()))
}

/// MIME type for the data URL, chosen by extension.
pub fn mime_type_for(path: &Path) -> Mime {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "png" => mime::IMAGE_PNG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "tiff" => "image/tiff"
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

pub fn data_url(mime_type: &Mime, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type.essence_str(), STANDARD.encode(bytes))
}

/// A failed file, serialized as `{filename: message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub filename: String,
    pub message: String,
}

impl FileError {
    pub fn new(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            message: message.into(),
        }
    }
}

impl Serialize for FileError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.filename, &self.message)?;
        map.end()
    }
}

/// Everything one extraction request produced.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BatchReport {
    /// Filename to extracted text or parsed JSON
    #[schema(value_type = Object)]
    pub results: Map<String, Value>,
    /// One `{filename: message}` entry per failed file
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub errors: Vec<FileError>,
}

/// Frames of the streaming extraction response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExtractionEvent {
    Started {
        status: &'static str,
        total_files: usize,
    },
    Progress {
        progress: String,
        data: Value,
    },
    Error {
        error: FileError,
    },
    Complete {
        status: &'static str,
        results: Map<String, Value>,
        errors: Option<Vec<FileError>>,
    },
}

impl ExtractionEvent {
    pub fn started(total_files: usize) -> Self {
        ExtractionEvent::Started {
            status: "started",
            total_files,
        }
    }

    pub fn complete(report: BatchReport) -> Self {
        ExtractionEvent::Complete {
            status: "complete",
            results: report.results,
            errors: (!report.errors.is_empty()).then_some(report.errors),
        }
    }
}

/// Where per-file progress goes. Inactive for the single-response path.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ExtractionEvent>>,
}

/// The receiving side went away.
#[derive(Debug)]
pub struct Disconnected;

impl EventSink {
    pub fn channel(tx: mpsc::Sender<ExtractionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    async fn emit(&self, event: ExtractionEvent) -> Result<(), Disconnected> {
        match &self.tx {
            Some(tx) => tx.send(event).await.map_err(|_| Disconnected),
            None => Ok(()),
        }
    }
}

/// Reads staged images and asks the vision model about them, one at a time.
#[derive(Clone)]
pub struct ImageExtractor {
    model: Arc<dyn VisionModel>,
}

impl ImageExtractor {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub async fn build_request(
        &self,
        path: &Path,
        mode: ExtractionMode,
    ) -> Result<VisionRequest, ExtractionError> {
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_type_for(path);

        Ok(VisionRequest {
            system_prompt: mode.system_prompt().to_string(),
            user_prompt: mode.user_prompt().to_string(),
            image_url: data_url(&mime_type, &bytes),
        })
    }

    /// Extracts one file. With an active sink the model is streamed and a
    /// `progress` event carrying the text so far is emitted per delta,
    /// followed by one with the finished value. The finished value is
    /// returned either way.
    pub async fn extract(
        &self,
        file: &StagedFile,
        mode: ExtractionMode,
        sink: &EventSink,
    ) -> Result<Result<Value, ExtractionError>, Disconnected> {
        let request = match self.build_request(&file.path, mode).await {
            Ok(request) => request,
            Err(e) => return Ok(Err(e)),
        };

        if !sink.is_active() {
            return Ok(self
                .model
                .complete(&request)
                .await
                .map(|text| mode.finish(&text))
                .map_err(ExtractionError::from));
        }

        let mut deltas = match self.model.complete_streaming(&request).await {
            Ok(deltas) => deltas,
            Err(e) => return Ok(Err(e.into())),
        };

        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    text.push_str(&delta);
                    sink.emit(ExtractionEvent::Progress {
                        progress: file.filename.clone(),
                        data: Value::String(text.clone()),
                    })
                    .await?;
                }
                Err(e) => return Ok(Err(e.into())),
            }
        }

        let value = mode.finish(&text);
        sink.emit(ExtractionEvent::Progress {
            progress: file.filename.clone(),
            data: value.clone(),
        })
        .await?;
        Ok(Ok(value))
    }

    /// Runs the whole batch sequentially. Per-file failures are recorded and
    /// the batch continues. With an active sink, emits `started` first and
    /// `complete` last; stops early if the receiver is dropped.
    pub async fn run_batch(
        &self,
        files: &[StagedFile],
        mode: ExtractionMode,
        sink: &EventSink,
    ) -> Result<BatchReport, Disconnected> {
        sink.emit(ExtractionEvent::started(files.len())).await?;

        let mut report = BatchReport::default();
        for file in files {
            info!("🔍 Extracting {} ({:?})", file.filename, mode);

            match self.extract(file, mode, sink).await? {
                Ok(value) => {
                    report.results.insert(file.filename.clone(), value);
                }
                Err(e) => {
                    warn!("⚠️  Extraction failed for {}: {}", file.filename, e);
                    let error = FileError::new(&file.filename, e.to_string());
                    sink.emit(ExtractionEvent::Error {
                        error: error.clone(),
                    })
                    .await?;
                    report.errors.push(error);
                }
            }
        }

        info!(
            "✅ Batch finished: {} succeeded, {} failed",
            report.results.len(),
            report.errors.len()
        );

        sink.emit(ExtractionEvent::complete(report.clone())).await?;
        Ok(report)
    }
}
