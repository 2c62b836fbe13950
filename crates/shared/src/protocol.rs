//! JSON shapes exchanged with the segmentation inference service.
//!
//! Field names follow the service contract verbatim. Each response converts
//! into its domain counterpart through a checked conversion so that nothing
//! downstream ever holds an out-of-range percentage or a misaligned catalog.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        AnalysisResult, BackendStatus, ClassCatalog, ClassId, ClassStatistic, ClassSwatch,
        HealthSnapshot, ImageSet, ImageSize, ModelMetadata, PredictionSummary, Rgb,
    },
    error::InvalidPayload,
};

pub const HEALTHY_STATUS: &str = "healthy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassStatisticPayload {
    pub class_id: i64,
    pub class_name: String,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub dominant_class: String,
    pub dominant_class_percentage: f64,
    pub image_size: Vec<i64>,
    pub class_statistics: Vec<ClassStatisticPayload>,
    pub images: ImageSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmented_image_size: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
}

fn check_percentage(field: &str, value: f64) -> Result<f64, InvalidPayload> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(InvalidPayload::PercentageOutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

impl TryFrom<PredictionResponse> for AnalysisResult {
    type Error = InvalidPayload;

    fn try_from(value: PredictionResponse) -> Result<Self, Self::Error> {
        let image_size = match value.image_size.as_slice() {
            &[width, height] if width > 0 && height > 0 => ImageSize {
                width: u32::try_from(width)
                    .map_err(|_| InvalidPayload::ImageSizeNotPositive { width, height })?,
                height: u32::try_from(height)
                    .map_err(|_| InvalidPayload::ImageSizeNotPositive { width, height })?,
            },
            &[width, height] => {
                return Err(InvalidPayload::ImageSizeNotPositive { width, height });
            }
            other => return Err(InvalidPayload::ImageSizeArity(other.len())),
        };

        let dominant_class_percentage =
            check_percentage("dominant_class", value.dominant_class_percentage)?;

        let mut seen = HashSet::new();
        let mut class_statistics = Vec::with_capacity(value.class_statistics.len());
        for stat in value.class_statistics {
            if !seen.insert(stat.class_id) {
                return Err(InvalidPayload::DuplicateClassId(stat.class_id));
            }
            let percentage = check_percentage(&stat.class_name, stat.percentage)?;
            class_statistics.push(ClassStatistic {
                class_id: ClassId(stat.class_id),
                class_name: stat.class_name,
                percentage,
                pixel_count: stat.pixel_count,
            });
        }
        // The service already sorts, but the ordering is part of our contract.
        class_statistics.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));

        Ok(Self {
            images: value.images,
            image_size,
            dominant_class: value.dominant_class,
            dominant_class_percentage,
            class_statistics,
            segmented_image_size: value.segmented_image_size,
            num_classes: value.num_classes,
            timestamp: value.timestamp,
            filename: value.filename,
            artifacts_path: value.artifacts_path,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
}

impl HealthResponse {
    pub fn into_snapshot(self, checked_at: DateTime<Utc>) -> HealthSnapshot {
        let status = if self.status == HEALTHY_STATUS {
            BackendStatus::Healthy
        } else {
            BackendStatus::Degraded(self.status)
        };
        HealthSnapshot {
            status,
            model_loaded: self.model_loaded,
            checked_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub model_name: String,
    pub tensorflow_version: String,
    pub keras_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_parameters: Option<u64>,
}

impl From<ModelInfoResponse> for ModelMetadata {
    fn from(value: ModelInfoResponse) -> Self {
        Self {
            model_name: value.model_name,
            tensorflow_version: value.tensorflow_version,
            keras_version: value.keras_version,
            num_classes: value.num_classes,
            num_parameters: value.num_parameters,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassListResponse {
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub class_colors: Vec<Vec<i64>>,
}

impl TryFrom<ClassListResponse> for ClassCatalog {
    type Error = InvalidPayload;

    fn try_from(value: ClassListResponse) -> Result<Self, Self::Error> {
        if value.class_names.len() != value.class_colors.len() {
            return Err(InvalidPayload::CatalogLengthMismatch {
                names: value.class_names.len(),
                colors: value.class_colors.len(),
            });
        }

        let classes = value
            .class_names
            .into_iter()
            .zip(value.class_colors)
            .enumerate()
            .map(|(index, (class_name, channels))| {
                let class_color = parse_rgb(index, &channels)?;
                Ok(ClassSwatch {
                    class_name,
                    class_color,
                })
            })
            .collect::<Result<Vec<_>, InvalidPayload>>()?;

        Ok(Self { classes })
    }
}

fn parse_rgb(index: usize, channels: &[i64]) -> Result<Rgb, InvalidPayload> {
    let &[r, g, b] = channels else {
        return Err(InvalidPayload::ColorArity {
            index,
            len: channels.len(),
        });
    };
    let channel = |value: i64| {
        u8::try_from(value).map_err(|_| InvalidPayload::ColorChannel { index, value })
    };
    Ok(Rgb(channel(r)?, channel(g)?, channel(b)?))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionListResponse {
    #[serde(default)]
    pub predictions: Vec<PredictionSummary>,
}
