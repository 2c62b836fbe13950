//! Text projection of controller state. No decisions are made here.

use shared::domain::{AnalysisResult, ClassCatalog, HealthSnapshot, ImageRef, PredictionSummary};

use crate::{catalog::legend, health::MetadataState, workflow::WorkflowPhase};

pub const TOP_CLASSES: usize = 5;

pub fn phase_line(phase: &WorkflowPhase) -> String {
    match phase {
        WorkflowPhase::Idle => "No image selected.".to_string(),
        WorkflowPhase::Selecting { selection, notice } => {
            let mut line = match selection {
                Some(selection) => format!("Selected {}", selection.image.file_name),
                None => "No image selected.".to_string(),
            };
            if let Some(notice) = notice {
                line.push_str(&format!(" ({notice})"));
            }
            line
        }
        WorkflowPhase::Submitting { stage, .. } => format!("Analysis in progress: {}", stage.label()),
        WorkflowPhase::Succeeded { result, .. } => {
            format!("Dominant class: {}", result.dominant_badge())
        }
        WorkflowPhase::Failed { message, .. } => message.clone(),
    }
}

pub fn result_lines(result: &AnalysisResult) -> Vec<String> {
    let mut lines = vec![
        format!("Dominant class: {}", result.dominant_badge()),
        format!("Image size: {} pixels", result.image_size),
        "Class distribution:".to_string(),
    ];
    lines.extend(
        result
            .top_classes(TOP_CLASSES)
            .iter()
            .map(|stat| format!("  {}: {:.1}%", stat.class_name, stat.percentage)),
    );
    if let Some(path) = &result.artifacts_path {
        lines.push(format!("Artifacts: {path}"));
    }
    lines
}

pub fn health_lines(snapshot: Option<&HealthSnapshot>) -> [&'static str; 2] {
    let reachable = snapshot.is_some_and(HealthSnapshot::reachable);
    let model_loaded = snapshot.is_some_and(|s| s.model_loaded);
    [
        if reachable {
            "API connected"
        } else {
            "API unreachable"
        },
        if model_loaded {
            "Model loaded"
        } else {
            "Model not loaded"
        },
    ]
}

pub fn metadata_lines(state: &MetadataState) -> Vec<String> {
    match state {
        MetadataState::Present(metadata) => {
            let mut lines = vec![
                format!("Model: {}", metadata.model_name),
                format!("TensorFlow: {}", metadata.tensorflow_version),
                format!("Keras: {}", metadata.keras_version),
            ];
            if let Some(num_classes) = metadata.num_classes {
                lines.push(format!("Classes: {num_classes}"));
            }
            lines
        }
        MetadataState::Pending | MetadataState::Absent => Vec::new(),
    }
}

pub fn legend_lines(catalog: &ClassCatalog) -> Vec<String> {
    if catalog.is_empty() {
        return vec!["No classes available.".to_string()];
    }
    legend(catalog)
        .into_iter()
        .map(|entry| {
            format!(
                "{} [background {}, text {}]",
                entry.class_name,
                entry.background.css(),
                entry.text.hex()
            )
        })
        .collect()
}

pub fn history_line(summary: &PredictionSummary) -> String {
    let dominant = match (&summary.dominant_class, summary.dominant_class_percentage) {
        (Some(class), Some(pct)) => format!("{class} ({pct:.1}%)"),
        (Some(class), None) => class.clone(),
        _ => "-".to_string(),
    };
    format!(
        "{}  {}  {}",
        summary.timestamp.as_deref().unwrap_or(&summary.folder),
        summary.filename.as_deref().unwrap_or("-"),
        dominant
    )
}

/// File name for an exported result image, with the extension taken from the
/// inline MIME type (`png` when it is missing or unknown).
pub fn export_file_name(name: &str, image: &ImageRef) -> String {
    let extension = image
        .inline_mime_type()
        .and_then(|mime| {
            let subtype = mime.split('/').nth(1).unwrap_or_default();
            let known = mime_guess::get_mime_extensions_str(mime)?;
            known
                .iter()
                .copied()
                .find(|ext| *ext == subtype)
                .or_else(|| known.first().copied())
        })
        .unwrap_or("png");
    format!("{name}.{extension}")
}
