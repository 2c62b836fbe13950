use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes shared by every client-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Busy,
    Transport,
    Protocol,
    Decode,
}

/// FastAPI-style error body, e.g. `{"detail": "Image trop grande"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    pub detail: serde_json::Value,
}

impl ServiceErrorBody {
    pub fn detail_text(&self) -> String {
        match &self.detail {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// A response body that parsed as JSON but violates the expected shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidPayload {
    #[error("image_size must contain exactly two entries, got {0}")]
    ImageSizeArity(usize),
    #[error("image_size entries must be positive, got {width}x{height}")]
    ImageSizeNotPositive { width: i64, height: i64 },
    #[error("{field} percentage {value} is outside [0, 100]")]
    PercentageOutOfRange { field: String, value: f64 },
    #[error("duplicate class_id {0} in class_statistics")]
    DuplicateClassId(i64),
    #[error("class color {index} has {len} channels, expected 3")]
    ColorArity { index: usize, len: usize },
    #[error("class color {index} channel value {value} is outside 0..=255")]
    ColorChannel { index: usize, value: i64 },
    #[error("class_names has {names} entries but class_colors has {colors}")]
    CatalogLengthMismatch { names: usize, colors: usize },
    #[error("image reference is not inline data")]
    NotInline,
    #[error("inline image payload is not valid base64: {0}")]
    InlineEncoding(String),
}
