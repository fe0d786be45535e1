use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::warn;
use shared::{HealthResponse, HealthState};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::db::tracking_repository::TrackingStore;
use crate::upstream::preprocess_service::Preprocessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    TrackingStore,
    PreprocessingService,
}

impl Component {
    pub fn description(&self) -> &'static str {
        match self {
            Component::TrackingStore => "Database is not healthy",
            Component::PreprocessingService => "Image processing service is not healthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthStatus {
    pub failing: BTreeSet<Component>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.failing.is_empty()
    }

    pub fn overall(&self) -> HealthState {
        if self.is_ok() {
            HealthState::Ok
        } else {
            HealthState::Error
        }
    }

    pub fn into_result(self) -> Result<HealthResponse, DependencyUnhealthy> {
        if self.is_ok() {
            Ok(HealthResponse::new(self.overall(), Vec::new()))
        } else {
            Err(DependencyUnhealthy(self.failing))
        }
    }
}

/// Only raised by the health endpoint.
#[derive(Debug)]
pub struct DependencyUnhealthy(pub BTreeSet<Component>);

impl std::error::Error for DependencyUnhealthy {}

impl fmt::Display for DependencyUnhealthy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<&str> = self.0.iter().map(Component::description).collect();
        write!(f, "{}", details.join(", "))
    }
}

impl ResponseError for DependencyUnhealthy {
    fn status_code(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    fn error_response(&self) -> HttpResponse {
        let details = self.0.iter().map(|c| c.description().to_string()).collect();
        HttpResponse::build(self.status_code()).json(HealthResponse::new(HealthState::Error, details))
    }
}

pub struct HealthMonitor {
    tracker: Arc<dyn TrackingStore>,
    preprocessor: Arc<dyn Preprocessor>,
}

impl HealthMonitor {
    pub fn new(tracker: Arc<dyn TrackingStore>, preprocessor: Arc<dyn Preprocessor>) -> Self {
        Self {
            tracker,
            preprocessor,
        }
    }

    /// Runs both probes to completion, even when the first one fails.
    pub async fn check_health(&self) -> HealthStatus {
        let (database, preprocessing) = futures::join!(self.tracker.ping(), self.preprocessor.ping());

        let mut status = HealthStatus::default();
        if let Err(e) = database {
            warn!("Health probe failed for the tracking database: {}", e);
            status.failing.insert(Component::TrackingStore);
        }
        if let Err(e) = preprocessing {
            warn!("Health probe failed for the preprocessing service: {}", e);
            status.failing.insert(Component::PreprocessingService);
        }
        status
    }
}
