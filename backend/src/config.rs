use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::logging::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid preprocessing URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid model manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),
    #[error("Vocabulary {0} is empty")]
    EmptyVocabulary(String),
    #[error("Target class '{0}' is missing from the segmentation vocabulary")]
    MissingTargetClass(String),
    #[error("Failed to load font {0}")]
    Font(String),
}

/// Runtime settings of the inference service, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub database_url: String,
    pub preprocess_url: Url,
    pub allowed_extensions: Vec<String>,
    pub preprocess_timeout: Duration,
    pub tracking_timeout: Duration,
    pub model_config_path: PathBuf,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "PORT", 5001u16)?;
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let user = required(&lookup, "POSTGRES_USER")?;
                let password = required(&lookup, "POSTGRES_PASSWORD")?;
                let db = required(&lookup, "POSTGRES_DB")?;
                let host = lookup("POSTGRES_HOST").unwrap_or_else(|| "postgres-service".to_string());
                let db_port = parse_or(&lookup, "POSTGRES_PORT", 5432u16)?;
                format!("postgresql://{}:{}@{}:{}/{}", user, password, host, db_port, db)
            }
        };

        let preprocess_url = lookup("PREPROCESS_URL").unwrap_or_else(|| "http://localhost:5002".to_string());
        let preprocess_url = Url::parse(&with_trailing_slash(&preprocess_url))?;

        let allowed_extensions = parse_extensions(
            &lookup("ALLOWED_EXTENSIONS").unwrap_or_else(|| "jpg,jpeg,png".to_string()),
        );
        if allowed_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ALLOWED_EXTENSIONS".to_string(),
                value: String::new(),
            });
        }

        let preprocess_timeout = Duration::from_secs(parse_or(&lookup, "PREPROCESS_TIMEOUT_SECS", 30u64)?);
        let tracking_timeout = Duration::from_secs(parse_or(&lookup, "TRACKING_TIMEOUT_SECS", 5u64)?);
        let model_config_path = PathBuf::from(
            lookup("MODEL_CONFIG").unwrap_or_else(|| "config/models.yaml".to_string()),
        );

        let logging = LoggingConfig::new(
            lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            lookup("LOG_TARGET").as_deref().unwrap_or("stdout"),
        );

        Ok(Self {
            port,
            database_url,
            preprocess_url,
            allowed_extensions,
            preprocess_timeout,
            tracking_timeout,
            model_config_path,
            logging,
        })
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

// Url::join drops the last path segment unless the base ends with '/'.
fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Model manifest, loaded from YAML at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: f32,
    pub classification: ClassificationSpec,
    pub detection: DetectionSpec,
    pub segmentation: SegmentationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationSpec {
    pub model: PathBuf,
    pub labels: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSpec {
    pub model: PathBuf,
    pub labels: PathBuf,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_box_color")]
    pub box_color: [u8; 3],
    #[serde(default = "default_line_width")]
    pub line_width: u32,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default)]
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationSpec {
    pub model: PathBuf,
    pub labels: PathBuf,
    #[serde(default = "default_target_class")]
    pub target_class: String,
}

fn default_score_threshold() -> f32 {
    0.9
}

fn default_box_color() -> [u8; 3] {
    [255, 0, 0]
}

fn default_line_width() -> u32 {
    4
}

fn default_font_size() -> f32 {
    30.0
}

fn default_target_class() -> String {
    "person".to_string()
}

impl ModelManifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let manifest: ModelManifest = serde_yaml::from_str(raw)?;
        Ok(manifest)
    }
}
