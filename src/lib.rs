pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::extractor::ImageExtractor;
use crate::services::staging::StagingArea;
use crate::services::vision::{OpenAiVisionModel, VisionModel};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_files,
        api::handlers::upload::upload_usage,
        api::handlers::extract::detailed_text_extractor,
        api::handlers::extract::text_extractor,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::UploadResponse,
            api::handlers::upload::UploadForm,
            api::handlers::health::HealthResponse,
            services::extractor::BatchReport,
        )
    ),
    tags(
        (name = "upload", description = "Stage a batch of images"),
        (name = "extract", description = "Run the vision model over the staged batch"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub staging: StagingArea,
    pub extractor: ImageExtractor,
}

impl AppState {
    pub fn new(config: AppConfig, model: Arc<dyn VisionModel>) -> Self {
        Self {
            staging: StagingArea::new(config.upload_folder.clone()),
            extractor: ImageExtractor::new(model),
            config,
        }
    }

    /// State backed by the OpenAI-compatible client described by `config`.
    pub fn from_config(config: AppConfig) -> Self {
        let model = Arc::new(OpenAiVisionModel::new(&config));
        Self::new(config, model)
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::health::index))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload-file",
            get(api::handlers::upload::upload_usage)
                .post(api::handlers::upload::upload_files)
                .layer(DefaultBodyLimit::max(state.config.max_upload_size)),
        )
        .route(
            "/detailed-text-extractor",
            get(api::handlers::extract::detailed_text_extractor),
        )
        .route(
            "/text-extractor",
            get(api::handlers::extract::text_extractor),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
