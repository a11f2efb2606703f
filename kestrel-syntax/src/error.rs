//! Errors raised while loading or building declaration trees

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyntaxError>;

#[derive(Error, Debug)]
pub enum SyntaxError {
    #[error("Invalid type reference `{text}` at column {column}: {message}")]
    TypeReference {
        text: String,
        column: usize,
        message: String,
    },

    #[error("Malformed declaration tree: {message}")]
    MalformedTree { message: String },

    #[error("Failed to decode declaration tree: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
}

impl SyntaxError {
    pub fn type_reference(text: impl Into<String>, column: usize, message: impl Into<String>) -> Self {
        Self::TypeReference {
            text: text.into(),
            column,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedTree {
            message: message.into(),
        }
    }
}
