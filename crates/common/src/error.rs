//! Error types shared across Keyroll crates.

use std::path::PathBuf;

/// Top-level error type for Keyroll operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyrollError {
    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Song error: {message}")]
    Song { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("An export is already in progress: {output}")]
    ExportInProgress { output: PathBuf },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using KeyrollError.
pub type KeyrollResult<T> = Result<T, KeyrollError>;

impl KeyrollError {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn song(msg: impl Into<String>) -> Self {
        Self::Song {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_messages() {
        assert_eq!(
            KeyrollError::encode("stream closed").to_string(),
            "Encode error: stream closed"
        );
        assert_eq!(
            KeyrollError::render("no target").to_string(),
            "Render error: no target"
        );
    }

    #[test]
    fn test_io_error_is_transparent() {
        let err: KeyrollError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.to_string(), "denied");
    }
}
