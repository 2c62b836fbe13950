//! Upload → inference → render lifecycle for a single analysis slot.
//!
//! The controller owns exactly one [`WorkflowPhase`], published through a
//! `tokio::sync::watch` channel so views can observe it. Submissions are
//! first-come: while one is in flight every further `submit` is rejected
//! with [`ClientError::Busy`]. Each submission carries a ticket; its
//! response is applied only while that ticket is still the one recorded in
//! the `Submitting` phase, so a response that outlives a `reset` is dropped.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{AnalysisResult, MAX_IMAGE_SIDE};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    error::ClientError,
    selection::{ImageFile, PreviewProvider, Selection},
    InferenceApi,
};

pub const NO_FILE_MESSAGE: &str = "Please select an image";
pub const CANCELLED_MESSAGE: &str = "Analysis was cancelled before the service answered.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Preparing,
    Uploading,
    ProcessingResponse,
    Finalizing,
}

impl ProgressStage {
    pub fn label(self) -> &'static str {
        match self {
            ProgressStage::Preparing => "Preparing image...",
            ProgressStage::Uploading => "Uploading to the server...",
            ProgressStage::ProcessingResponse => "Processing response...",
            ProgressStage::Finalizing => "Finalizing...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionTicket(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowPhase {
    Idle,
    Selecting {
        selection: Option<Selection>,
        /// Validation error or soft warning to show next to the form.
        notice: Option<String>,
    },
    Submitting {
        selection: Selection,
        ticket: SubmissionTicket,
        stage: ProgressStage,
    },
    Succeeded {
        selection: Selection,
        result: Arc<AnalysisResult>,
    },
    Failed {
        selection: Selection,
        message: String,
        cause: ClientError,
    },
}

impl WorkflowPhase {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::Selecting { .. } => "selecting",
            WorkflowPhase::Submitting { .. } => "submitting",
            WorkflowPhase::Succeeded { .. } => "succeeded",
            WorkflowPhase::Failed { .. } => "failed",
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, WorkflowPhase::Submitting { .. })
    }

    pub fn selection(&self) -> Option<&Selection> {
        match self {
            WorkflowPhase::Idle => None,
            WorkflowPhase::Selecting { selection, .. } => selection.as_ref(),
            WorkflowPhase::Submitting { selection, .. }
            | WorkflowPhase::Succeeded { selection, .. }
            | WorkflowPhase::Failed { selection, .. } => Some(selection),
        }
    }

    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        match self {
            WorkflowPhase::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }

    /// User-facing error or notice, if the phase carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            WorkflowPhase::Selecting { notice, .. } => notice.as_deref(),
            WorkflowPhase::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn progress_label(&self) -> Option<&'static str> {
        match self {
            WorkflowPhase::Submitting { stage, .. } => Some(stage.label()),
            _ => None,
        }
    }

    fn into_selection(self) -> Option<Selection> {
        match self {
            WorkflowPhase::Idle => None,
            WorkflowPhase::Selecting { selection, .. } => selection,
            WorkflowPhase::Submitting { selection, .. }
            | WorkflowPhase::Succeeded { selection, .. }
            | WorkflowPhase::Failed { selection, .. } => Some(selection),
        }
    }
}

/// What happened to an admitted submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Succeeded(Arc<AnalysisResult>),
    Failed(ClientError),
    /// The response arrived after the workflow moved on and was dropped.
    Discarded,
}

pub struct WorkflowController {
    api: Arc<dyn InferenceApi>,
    previews: Arc<dyn PreviewProvider>,
    request_timeout: Duration,
    phase: watch::Sender<WorkflowPhase>,
    next_ticket: AtomicU64,
}

impl WorkflowController {
    pub fn new(
        api: Arc<dyn InferenceApi>,
        previews: Arc<dyn PreviewProvider>,
        request_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(WorkflowPhase::Idle);
        Self {
            api,
            previews,
            request_timeout,
            phase,
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> WorkflowPhase {
        self.phase.borrow().clone()
    }

    /// Replaces the current selection, releasing its preview first.
    /// Rejected while a submission is in flight.
    pub fn select(&self, image: ImageFile) -> Result<(), ClientError> {
        if !image.is_image() {
            return Err(ClientError::Validation(format!(
                "'{}' is not an image ({})",
                image.file_name, image.mime_type
            )));
        }

        let dimensions = image.dimensions();
        let notice = dimensions
            .filter(|size| size.exceeds_service_limit())
            .map(|size| {
                format!(
                    "Image is {size} pixels; the service accepts at most {MAX_IMAGE_SIDE} × {MAX_IMAGE_SIDE}."
                )
            });

        let mut outcome = Ok(());
        self.phase.send_if_modified(|phase| {
            if phase.is_submitting() {
                outcome = Err(ClientError::Busy);
                return false;
            }

            let previous = std::mem::replace(phase, WorkflowPhase::Idle);
            if let Some(old) = previous.into_selection() {
                self.previews.revoke(&old.preview);
            }

            debug!(file = %image.file_name, mime = %image.mime_type, "image selected");
            let preview = self.previews.create(&image);
            *phase = WorkflowPhase::Selecting {
                selection: Some(Selection {
                    image,
                    preview,
                    dimensions,
                }),
                notice,
            };
            true
        });
        outcome
    }

    /// Sends the selected image to the service and applies the outcome.
    ///
    /// Returns `Err` only when the submission is rejected before any network
    /// call: [`ClientError::Validation`] when nothing is selected and
    /// [`ClientError::Busy`] when another submission is in flight.
    pub async fn submit(&self) -> Result<SubmitOutcome, ClientError> {
        let ticket = SubmissionTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let image = self.admit(ticket)?;
        let mut in_flight = InFlight {
            controller: self,
            ticket,
            armed: true,
        };

        info!(
            ticket = ticket.0,
            file = %image.file_name,
            bytes = image.bytes.len(),
            "submitting image for segmentation"
        );

        let progress = |stage: ProgressStage| self.advance(ticket, stage);
        let outcome =
            match tokio::time::timeout(self.request_timeout, self.api.predict(&image, &progress))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Timeout(self.request_timeout)),
            };

        in_flight.armed = false;
        if outcome.is_ok() {
            self.advance(ticket, ProgressStage::Finalizing);
        }
        Ok(self.settle(ticket, outcome))
    }

    /// Clears selection, result and error, releasing the preview. A
    /// submission still in flight is logically cancelled.
    pub fn reset(&self) {
        let previous = self.phase.send_replace(WorkflowPhase::Idle);
        if let WorkflowPhase::Submitting { ticket, .. } = &previous {
            debug!(ticket = ticket.0, "reset while submitting; response will be discarded");
        }
        if let Some(selection) = previous.into_selection() {
            self.previews.revoke(&selection.preview);
        }
    }

    fn admit(&self, ticket: SubmissionTicket) -> Result<ImageFile, ClientError> {
        let mut admitted = Err(ClientError::Busy);
        self.phase.send_if_modified(|phase| {
            if phase.is_submitting() {
                return false;
            }

            match std::mem::replace(phase, WorkflowPhase::Idle).into_selection() {
                Some(selection) => {
                    admitted = Ok(selection.image.clone());
                    *phase = WorkflowPhase::Submitting {
                        selection,
                        ticket,
                        stage: ProgressStage::Preparing,
                    };
                }
                None => {
                    admitted = Err(ClientError::Validation(NO_FILE_MESSAGE.to_string()));
                    *phase = WorkflowPhase::Selecting {
                        selection: None,
                        notice: Some(NO_FILE_MESSAGE.to_string()),
                    };
                }
            }
            true
        });

        if let Err(err) = &admitted {
            warn!(ticket = ticket.0, %err, "submission rejected");
        }
        admitted
    }

    fn advance(&self, ticket: SubmissionTicket, next: ProgressStage) {
        self.phase.send_if_modified(|phase| match phase {
            WorkflowPhase::Submitting {
                ticket: current,
                stage,
                ..
            } if *current == ticket && *stage != next => {
                *stage = next;
                true
            }
            _ => false,
        });
    }

    /// Returns a still-current `Submitting` phase to `Selecting` after its
    /// `submit` future was dropped mid-flight.
    fn abandon(&self, ticket: SubmissionTicket) {
        let abandoned = self.phase.send_if_modified(|phase| {
            match std::mem::replace(phase, WorkflowPhase::Idle) {
                WorkflowPhase::Submitting {
                    selection,
                    ticket: current,
                    ..
                } if current == ticket => {
                    *phase = WorkflowPhase::Selecting {
                        selection: Some(selection),
                        notice: Some(CANCELLED_MESSAGE.to_string()),
                    };
                    true
                }
                other => {
                    *phase = other;
                    false
                }
            }
        });
        if abandoned {
            warn!(ticket = ticket.0, "submission dropped before completion");
        }
    }

    fn settle(
        &self,
        ticket: SubmissionTicket,
        outcome: Result<AnalysisResult, ClientError>,
    ) -> SubmitOutcome {
        let outcome = outcome.map(Arc::new);
        let mut applied = false;
        self.phase.send_if_modified(|phase| {
            match std::mem::replace(phase, WorkflowPhase::Idle) {
                WorkflowPhase::Submitting {
                    selection,
                    ticket: current,
                    ..
                } if current == ticket => {
                    *phase = match &outcome {
                        Ok(result) => WorkflowPhase::Succeeded {
                            selection,
                            result: Arc::clone(result),
                        },
                        Err(cause) => WorkflowPhase::Failed {
                            selection,
                            message: cause.user_message(),
                            cause: cause.clone(),
                        },
                    };
                    applied = true;
                    true
                }
                other => {
                    *phase = other;
                    false
                }
            }
        });

        if !applied {
            debug!(ticket = ticket.0, "discarding stale submission response");
            return SubmitOutcome::Discarded;
        }

        match outcome {
            Ok(result) => {
                info!(
                    ticket = ticket.0,
                    dominant_class = %result.dominant_class,
                    percentage = result.dominant_class_percentage,
                    "segmentation succeeded"
                );
                SubmitOutcome::Succeeded(result)
            }
            Err(cause) => {
                error!(ticket = ticket.0, kind = ?cause.kind(), %cause, "segmentation failed");
                SubmitOutcome::Failed(cause)
            }
        }
    }
}

/// Held by `submit` across the request; releases the in-flight slot if the
/// future is dropped before the outcome is settled.
struct InFlight<'a> {
    controller: &'a WorkflowController,
    ticket: SubmissionTicket,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon(self.ticket);
        }
    }
}

impl Drop for WorkflowController {
    fn drop(&mut self) {
        if let Some(selection) = self.phase.send_replace(WorkflowPhase::Idle).into_selection() {
            self.previews.revoke(&selection.preview);
        }
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
