//! Crate settings loaded from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationErrors;
use crate::ingress::ControllerOptions;
use crate::model::validation::validate_proxy_mesh_config;
use crate::model::ProxyMeshConfig;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid mesh config: {0}")]
    Mesh(ValidationErrors),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub ingress: IngressSettings,
    pub mesh: ProxyMeshConfig,
    pub logging: LoggingSettings,
}

/// Polling monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    pub period_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

impl MonitorSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Ingress adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSettings {
    /// Namespace to watch. Empty watches every namespace.
    pub namespace: String,
    pub domain_suffix: String,
    pub retry_delay_ms: u64,
    /// Attempts after which a failing task is dropped. Unset retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            domain_suffix: "cluster.local".to_string(),
            retry_delay_ms: 1000,
            max_attempts: None,
        }
    }
}

impl IngressSettings {
    /// Options for an [`IngressController`](crate::ingress::IngressController).
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            namespace: self.namespace.clone(),
            domain_suffix: self.domain_suffix.clone(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directives, e.g. `info` or `meshsync=debug`. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Loads and validates settings from a YAML file.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

/// Parses and validates settings from YAML text. Empty text yields the defaults.
pub fn load_settings_from_str(content: &str) -> Result<Settings, SettingsError> {
    let settings: Settings = if content.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if settings.monitor.period_ms == 0 {
        return Err(SettingsError::Validation {
            message: "monitor.periodMs must be greater than 0".to_string(),
        });
    }
    if settings.ingress.domain_suffix.is_empty() {
        return Err(SettingsError::Validation {
            message: "ingress.domainSuffix must not be empty".to_string(),
        });
    }
    if settings.ingress.max_attempts == Some(0) {
        return Err(SettingsError::Validation {
            message: "ingress.maxAttempts must be at least 1".to_string(),
        });
    }

    validate_proxy_mesh_config(&settings.mesh).map_err(SettingsError::Mesh)
}
