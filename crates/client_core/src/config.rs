use std::{collections::HashMap, fs, path::Path, time::Duration};

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1/segmentation";
pub const DEFAULT_CONFIG_FILE: &str = "segview.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid {key} '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base_url: String,
    /// Class listing route; falls back to `{api_base_url}/model/info`, which
    /// carries `class_names`/`class_colors` on the reference service.
    pub classes_url: Option<String>,
    pub request_timeout: Duration,
    pub health_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            classes_url: None,
            request_timeout: Duration::from_secs(60),
            health_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientSettings {
    pub fn with_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    fn route(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base_url.trim_end_matches('/'))
    }

    pub fn predict_url(&self) -> String {
        self.route("predict")
    }

    pub fn health_url(&self) -> String {
        self.route("health")
    }

    pub fn model_info_url(&self) -> String {
        self.route("model/info")
    }

    pub fn predictions_url(&self) -> String {
        self.route("predictions")
    }

    pub fn classes_url(&self) -> String {
        self.classes_url
            .clone()
            .unwrap_or_else(|| self.model_info_url())
    }

    /// Overlays flat `key = value` pairs from a TOML document.
    pub fn apply_toml(&mut self, raw: &str, path: &str) -> Result<(), SettingsError> {
        let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw).map_err(|source| {
            SettingsError::Parse {
                path: path.to_string(),
                source,
            }
        })?;

        let text = |key: &str| -> Option<String> {
            match file_cfg.get(key)? {
                toml::Value::String(v) => Some(v.clone()),
                toml::Value::Integer(v) => Some(v.to_string()),
                _ => None,
            }
        };

        if let Some(v) = text("api_url") {
            self.api_base_url = v;
        }
        if let Some(v) = text("classes_url") {
            self.classes_url = Some(v);
        }
        if let Some(v) = text("request_timeout_secs") {
            self.request_timeout = parse_secs("request_timeout_secs", &v)?;
        }
        if let Some(v) = text("health_interval_secs") {
            self.health_interval = parse_secs("health_interval_secs", &v)?;
        }
        if let Some(v) = text("probe_timeout_secs") {
            self.probe_timeout = parse_secs("probe_timeout_secs", &v)?;
        }
        Ok(())
    }

    /// Overlays environment variables read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SEGVIEW_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("APP__API_URL") {
            self.api_base_url = v;
        }

        if let Some(v) = lookup("SEGVIEW_CLASSES_URL") {
            self.classes_url = Some(v);
        }
        if let Some(v) = lookup("APP__CLASSES_URL") {
            self.classes_url = Some(v);
        }

        if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
            self.request_timeout = parse_secs("APP__REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("APP__HEALTH_INTERVAL_SECS") {
            self.health_interval = parse_secs("APP__HEALTH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("APP__PROBE_TIMEOUT_SECS") {
            self.probe_timeout = parse_secs("APP__PROBE_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        check_http_url("api_url", &self.api_base_url)?;
        if let Some(classes_url) = &self.classes_url {
            check_http_url("classes_url", classes_url)?;
        }
        for (key, value) in [
            ("request_timeout_secs", self.request_timeout),
            ("health_interval_secs", self.health_interval),
            ("probe_timeout_secs", self.probe_timeout),
        ] {
            if value.is_zero() {
                return Err(SettingsError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, SettingsError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| SettingsError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn check_http_url(key: &'static str, raw: &str) -> Result<(), SettingsError> {
    let parsed = Url::parse(raw).map_err(|e| SettingsError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SettingsError::Invalid {
            key,
            value: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Defaults, then the config file (explicit path, or `segview.toml` in the
/// working directory when present), then the process environment.
pub fn load_settings(config_path: Option<&Path>) -> Result<ClientSettings, SettingsError> {
    let mut settings = ClientSettings::default();

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => settings.apply_toml(&raw, &path.display().to_string())?,
        Err(err) if config_path.is_none() && err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    }

    settings.apply_env_with(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
