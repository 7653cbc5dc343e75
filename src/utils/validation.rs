use anyhow::{Result, anyhow};
use unicode_normalization::UnicodeNormalization;

/// Image extensions accepted by the upload endpoint (compared lower-cased)
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Checks the text after the last '.' against the allow-list, ignoring case.
/// A name without any '.' is never allowed.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Reduces a client-supplied filename to a flat, ASCII-only name that is
/// safe to join onto the staging directory.
///
/// Accented letters are decomposed (NFKD) so their ASCII base survives,
/// path separators become whitespace, whitespace runs collapse to a single
/// '_', anything outside `[A-Za-z0-9_.-]` is dropped and leading/trailing
/// '.' and '_' are stripped. Returns an error if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from upload name: {}", filename);
    }

    let spaced: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let sanitized = kept.trim_matches(|c| c == '.' || c == '_');

    if sanitized.is_empty() {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: format!("Filename '{}' has no usable characters", filename),
        }));
    }

    // Limit length; the name is pure ASCII at this point
    let sanitized = if sanitized.len() > 255 {
        &sanitized[sanitized.len() - 255..]
    } else {
        sanitized
    };

    Ok(sanitized.to_string())
}
