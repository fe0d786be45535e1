use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::InferenceError;
use crate::upstream::preprocess_service::PreprocessError;

/// Caller-visible failures of `POST /inference`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("This file type is not allowed: {0}")]
    UnsupportedFileType(String),
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Failed to process image: {0}")]
    UpstreamService(#[from] PreprocessError),
    #[error("{0}")]
    UnknownTask(String),
    #[error("Failed to perform inference: {0}")]
    Inference(InferenceError),
    #[error("Inference worker failed: {0}")]
    Worker(String),
}

impl From<InferenceError> for PipelineError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::UnknownTask(_) => PipelineError::UnknownTask(err.to_string()),
            other => PipelineError::Inference(other),
        }
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::UnsupportedFileType(_)
            | PipelineError::InvalidUpload(_)
            | PipelineError::UnknownTask(_) => StatusCode::BAD_REQUEST,
            PipelineError::UpstreamService(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::UpstreamService(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Inference(_) | PipelineError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}
