use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AnalysisResult, PredictionSummary},
    error::ServiceErrorBody,
    protocol::{
        ClassListResponse, HealthResponse, ModelInfoResponse, PredictionListResponse,
        PredictionResponse,
    },
};
use tracing::debug;

pub mod catalog;
pub mod config;
pub mod error;
pub mod health;
pub mod selection;
pub mod view;
pub mod workflow;

pub use catalog::{legend, load_class_catalog, LegendEntry};
pub use config::{load_settings, ClientSettings, SettingsError};
pub use error::ClientError;
pub use health::{HealthMonitor, HealthMonitorHandle, MetadataState};
pub use selection::{BlobPreviewRegistry, ImageFile, PreviewProvider, PreviewRef, Selection};
pub use workflow::{ProgressStage, SubmissionTicket, SubmitOutcome, WorkflowController, WorkflowPhase};

/// Black-box view of the segmentation inference service.
///
/// `predict` reports [`ProgressStage`] milestones through `progress`; they
/// are cosmetic and never gate the outcome.
#[async_trait]
pub trait InferenceApi: Send + Sync {
    async fn predict(
        &self,
        image: &ImageFile,
        progress: &(dyn Fn(ProgressStage) + Send + Sync),
    ) -> Result<AnalysisResult, ClientError>;
    async fn health(&self) -> Result<HealthResponse, ClientError>;
    async fn model_info(&self) -> Result<ModelInfoResponse, ClientError>;
    async fn classes(&self) -> Result<ClassListResponse, ClientError>;
    async fn recent_predictions(&self) -> Result<Vec<PredictionSummary>, ClientError>;
}

pub struct HttpInferenceClient {
    http: Client,
    settings: ClientSettings,
}

impl HttpInferenceClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| ClientError::from_reqwest(err, timeout))?;
        read_json(response, timeout).await
    }
}

/// Maps a non-2xx response to [`ClientError::Protocol`] (keeping any
/// `detail` the service sent) and decodes a 2xx body as `T`. `timeout` is
/// the request's deadline, reported if the body read runs past it.
pub async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ServiceErrorBody>(&body)
            .map(|body| body.detail_text())
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
        return Err(ClientError::Protocol {
            status: status.as_u16(),
            detail,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| ClientError::from_reqwest(err, timeout))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl InferenceApi for HttpInferenceClient {
    async fn predict(
        &self,
        image: &ImageFile,
        progress: &(dyn Fn(ProgressStage) + Send + Sync),
    ) -> Result<AnalysisResult, ClientError> {
        let part = multipart::Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)
            .map_err(|e| ClientError::Validation(format!("invalid MIME type: {e}")))?;
        let form = multipart::Form::new().part("file", part);

        let timeout = self.settings.request_timeout;
        progress(ProgressStage::Uploading);
        let response = self
            .http
            .post(self.settings.predict_url())
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|err| ClientError::from_reqwest(err, timeout))?;

        progress(ProgressStage::ProcessingResponse);
        let payload: PredictionResponse = read_json(response, timeout).await?;
        Ok(AnalysisResult::try_from(payload)?)
    }

    async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json(self.settings.health_url(), self.settings.probe_timeout)
            .await
    }

    async fn model_info(&self) -> Result<ModelInfoResponse, ClientError> {
        self.get_json(self.settings.model_info_url(), self.settings.probe_timeout)
            .await
    }

    async fn classes(&self) -> Result<ClassListResponse, ClientError> {
        self.get_json(self.settings.classes_url(), self.settings.probe_timeout)
            .await
    }

    async fn recent_predictions(&self) -> Result<Vec<PredictionSummary>, ClientError> {
        let listing: PredictionListResponse = self
            .get_json(self.settings.predictions_url(), self.settings.probe_timeout)
            .await?;
        Ok(listing.predictions)
    }
}

#[cfg(test)]
#[path = "tests/fake_api.rs"]
pub(crate) mod fake_api;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
