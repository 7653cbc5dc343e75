use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gpt-4.1-2025-04-14";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Runtime configuration, read once at startup and handed to the services
/// that need it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API key for the vision model provider (`OPENAI_API_KEY`)
    pub openai_api_key: String,

    /// Model identifier (`LLM_MODEL`, default: gpt-4.1-2025-04-14)
    pub model: String,

    /// Base URL of the chat-completions API (`OPENAI_BASE_URL`)
    pub api_base: String,

    /// Completion token cap per image (`LLM_MAX_TOKENS`, default: 1000)
    pub max_tokens: u32,

    /// Staging directory holding the current batch (`UPLOAD_FOLDER`, default: uploads)
    pub upload_folder: PathBuf,

    /// Maximum upload request body in bytes (`MAX_UPLOAD_SIZE`, default: 64 MB)
    pub max_upload_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_tokens: 1000,
            upload_folder: PathBuf::from("uploads"),
            max_upload_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or(default.openai_api_key),

            model: env::var("LLM_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.model),

            api_base: env::var("OPENAI_BASE_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default.api_base),

            max_tokens: env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_tokens),

            upload_folder: env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(default.upload_folder),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),
        }
    }

    /// Config pointing at a scratch staging directory and a local model endpoint
    pub fn for_tests(upload_folder: impl Into<PathBuf>, api_base: impl Into<String>) -> Self {
        Self {
            openai_api_key: "test-key".to_string(),
            api_base: api_base.into(),
            upload_folder: upload_folder.into(),
            ..Self::default()
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.trim().is_empty()
    }
}
