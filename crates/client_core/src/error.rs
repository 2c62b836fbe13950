use std::time::Duration;

use shared::error::{ErrorKind, InvalidPayload};
use thiserror::Error;

/// Every way a call against the inference service (or a local precondition)
/// can fail. `Display` is the diagnostic form; [`ClientError::user_message`]
/// is what the view shows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("an analysis is already in progress")]
    Busy,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("service returned HTTP {status}: {detail}")]
    Protocol { status: u16, detail: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::Busy => ErrorKind::Busy,
            ClientError::Transport(_) | ClientError::Timeout(_) => ErrorKind::Transport,
            ClientError::Protocol { .. } => ErrorKind::Protocol,
            ClientError::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Human-readable message for the analysis view. The raw cause stays in
    /// the `Display` form for logs.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(message) => message.clone(),
            ClientError::Busy => {
                "An analysis is already in progress; wait for it to finish.".to_string()
            }
            ClientError::Transport(_) => {
                "Prediction failed: the segmentation service could not be reached.".to_string()
            }
            ClientError::Timeout(after) => format!(
                "Prediction failed: the segmentation service did not answer within {after:?}."
            ),
            ClientError::Protocol { status, .. } => {
                format!("Prediction failed: API error {status}")
            }
            ClientError::Decode(_) => {
                "Prediction failed: the service returned an unreadable response.".to_string()
            }
        }
    }
}

impl ClientError {
    /// Like the `From` conversion, but reports reqwest's own deadline as
    /// [`ClientError::Timeout`] with the configured duration.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(timeout)
        } else {
            err.into()
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            ClientError::Decode(value.to_string())
        } else if let Some(status) = value.status() {
            ClientError::Protocol {
                status: status.as_u16(),
                detail: status.canonical_reason().unwrap_or("unknown").to_string(),
            }
        } else {
            ClientError::Transport(value.to_string())
        }
    }
}

impl From<InvalidPayload> for ClientError {
    fn from(value: InvalidPayload) -> Self {
        ClientError::Decode(value.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        ClientError::Decode(value.to_string())
    }
}
