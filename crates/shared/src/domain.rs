use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub i64);

/// Perceptual luminance above which dark text is used on a colour swatch.
pub const CONTRAST_LUMINANCE_THRESHOLD: f64 = 186.0;

/// Largest image the inference service accepts, per side.
pub const MAX_IMAGE_SIDE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn luminance(self) -> f64 {
        0.299 * f64::from(self.0) + 0.587 * f64::from(self.1) + 0.114 * f64::from(self.2)
    }

    pub fn contrasting_text(self) -> TextTone {
        if self.luminance() < CONTRAST_LUMINANCE_THRESHOLD {
            TextTone::Light
        } else {
            TextTone::Dark
        }
    }

    pub fn css(self) -> String {
        format!("rgb({},{},{})", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextTone {
    Light,
    Dark,
}

impl TextTone {
    pub fn hex(self) -> &'static str {
        match self {
            TextTone::Light => "#fff",
            TextTone::Dark => "#000",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn exceeds_service_limit(&self) -> bool {
        self.width > MAX_IMAGE_SIDE || self.height > MAX_IMAGE_SIDE
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} × {}", self.width, self.height)
    }
}

/// Opaque displayable image reference: a URL or an inline `data:` image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_inline(&self) -> bool {
        self.0.starts_with("data:")
    }

    /// MIME type declared by a `data:` reference, if any.
    pub fn inline_mime_type(&self) -> Option<&str> {
        let header = self.0.strip_prefix("data:")?.split(',').next()?;
        let mime = header.split(';').next()?;
        (!mime.is_empty()).then_some(mime)
    }

    /// Decodes `data:<mime>;base64,<payload>` into raw bytes.
    pub fn decode_inline(&self) -> Result<Vec<u8>, InvalidPayload> {
        let rest = self.0.strip_prefix("data:").ok_or(InvalidPayload::NotInline)?;
        let (header, payload) = rest.split_once(',').ok_or(InvalidPayload::NotInline)?;
        if !header.ends_with(";base64") {
            return Err(InvalidPayload::NotInline);
        }
        STANDARD
            .decode(payload.trim())
            .map_err(|e| InvalidPayload::InlineEncoding(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub original: ImageRef,
    pub prediction_mask: ImageRef,
    pub overlay: ImageRef,
    pub side_by_side: ImageRef,
}

impl ImageSet {
    /// Named references in display order.
    pub fn named(&self) -> [(&'static str, &ImageRef); 4] {
        [
            ("original", &self.original),
            ("prediction_mask", &self.prediction_mask),
            ("overlay", &self.overlay),
            ("side_by_side", &self.side_by_side),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStatistic {
    pub class_id: ClassId,
    pub class_name: String,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_count: Option<u64>,
}

/// Immutable snapshot of one completed inference call.
///
/// `class_statistics` is always sorted non-increasing by percentage and every
/// percentage lies in `[0, 100]`; see [`crate::protocol::PredictionResponse`]
/// for the checked conversion from the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub images: ImageSet,
    pub image_size: ImageSize,
    pub dominant_class: String,
    pub dominant_class_percentage: f64,
    pub class_statistics: Vec<ClassStatistic>,
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

impl AnalysisResult {
    pub fn dominant_badge(&self) -> String {
        format!(
            "{} ({:.1}%)",
            self.dominant_class, self.dominant_class_percentage
        )
    }

    pub fn top_classes(&self, limit: usize) -> &[ClassStatistic] {
        &self.class_statistics[..self.class_statistics.len().min(limit)]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reported", rename_all = "snake_case")]
pub enum BackendStatus {
    Healthy,
    /// The backend answered but reported something other than healthy.
    Degraded(String),
    /// Network, protocol, decode or timeout failure while probing.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: BackendStatus,
    pub model_loaded: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn unreachable(checked_at: DateTime<Utc>) -> Self {
        Self {
            status: BackendStatus::Unreachable,
            model_loaded: false,
            checked_at,
        }
    }

    pub fn reachable(&self) -> bool {
        self.status == BackendStatus::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub tensorflow_version: String,
    pub keras_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_parameters: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSwatch {
    pub class_name: String,
    pub class_color: Rgb,
}

impl ClassSwatch {
    pub fn text_tone(&self) -> TextTone {
        self.class_color.contrasting_text()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCatalog {
    pub classes: Vec<ClassSwatch>,
}

impl ClassCatalog {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub dominant_class: Option<String>,
    #[serde(default)]
    pub dominant_class_percentage: Option<f64>,
    pub folder: String,
}
