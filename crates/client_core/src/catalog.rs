//! Class legend: one-shot fetch of class names and colours.

use std::time::Duration;

use shared::domain::{ClassCatalog, Rgb, TextTone};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::InferenceApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendEntry {
    pub class_name: String,
    pub background: Rgb,
    pub text: TextTone,
}

/// Never fails: any fetch, shape or alignment problem yields an empty
/// catalog, which the view renders as "no classes available".
pub async fn load_class_catalog(api: &dyn InferenceApi, fetch_timeout: Duration) -> ClassCatalog {
    let response = match timeout(fetch_timeout, api.classes()).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            warn!(%err, "class catalog unavailable");
            return ClassCatalog::default();
        }
        Err(_) => {
            warn!(timeout = ?fetch_timeout, "class catalog fetch timed out");
            return ClassCatalog::default();
        }
    };

    match ClassCatalog::try_from(response) {
        Ok(catalog) => {
            debug!(classes = catalog.len(), "class catalog loaded");
            catalog
        }
        Err(err) => {
            warn!(%err, "class catalog rejected");
            ClassCatalog::default()
        }
    }
}

pub fn legend(catalog: &ClassCatalog) -> Vec<LegendEntry> {
    catalog
        .classes
        .iter()
        .map(|swatch| LegendEntry {
            class_name: swatch.class_name.clone(),
            background: swatch.class_color,
            text: swatch.text_tone(),
        })
        .collect()
}
