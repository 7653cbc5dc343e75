use crate::AppState;
use crate::api::error::AppError;
use crate::services::extractor::{BatchReport, EventSink, ExtractionEvent, ExtractionMode};
use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use utoipa::IntoParams;

/// Buffered frames between the extraction task and the response writer.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExtractQuery {
    /// `true` (any case) streams progress as server-sent events
    pub stream: Option<String>,
}

impl ExtractQuery {
    pub fn wants_stream(&self) -> bool {
        self.stream
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

#[utoipa::path(
    get,
    path = "/detailed-text-extractor",
    params(ExtractQuery),
    responses(
        (status = 200, description = "Key-value pairs per staged file, or an event stream when stream=true", body = BatchReport),
        (status = 404, description = "Nothing has been uploaded or the upload folder is empty")
    ),
    tag = "extract"
)]
pub async fn detailed_text_extractor(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> Result<Response, AppError> {
    handle_extraction(state, ExtractionMode::Structured, query).await
}

#[utoipa::path(
    get,
    path = "/text-extractor",
    params(ExtractQuery),
    responses(
        (status = 200, description = "Raw text per staged file, or an event stream when stream=true", body = BatchReport),
        (status = 404, description = "Nothing has been uploaded or the upload folder is empty")
    ),
    tag = "extract"
)]
pub async fn text_extractor(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> Result<Response, AppError> {
    handle_extraction(state, ExtractionMode::RawText, query).await
}

async fn handle_extraction(
    state: AppState,
    mode: ExtractionMode,
    query: ExtractQuery,
) -> Result<Response, AppError> {
    let files = state.staging.list().await?;
    info!(
        "🧾 {:?} extraction over {} staged file(s), stream={}",
        mode,
        files.len(),
        query.wants_stream()
    );

    if !query.wants_stream() {
        let report = state
            .extractor
            .run_batch(&files, mode, &EventSink::default())
            .await
            .map_err(|_| AppError::Internal("extraction aborted".to_string()))?;
        return Ok(Json(report).into_response());
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let extractor = state.extractor.clone();

    tokio::spawn(async move {
        let sink = EventSink::channel(tx);
        if extractor.run_batch(&files, mode, &sink).await.is_err() {
            debug!("Client disconnected, extraction stream stopped");
        }
    });

    Ok(event_stream(rx, KeepAlive::new()))
}

/// Forwards extraction events as SSE frames until the producer finishes.
/// Comment frames keep the connection alive while a model call is slow.
fn event_stream(mut rx: mpsc::Receiver<ExtractionEvent>, keep_alive: KeepAlive) -> Response {
    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Event::default().json_data(&event);
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events).keep_alive(keep_alive),
    )
        .into_response()
}
