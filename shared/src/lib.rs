use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Analysis requested for an uploaded image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Task {
    Classification,
    Detection,
    Segmentation,
}

/// Outcome persisted for every inference attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrackingStatus {
    Passed,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Constructor)]
pub struct ClassificationResponse {
    pub category: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Constructor)]
pub struct ErrorResponse {
    #[serde(rename = "Error")]
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Constructor)]
pub struct HealthResponse {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}
