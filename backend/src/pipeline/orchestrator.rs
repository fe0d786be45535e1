use image::DynamicImage;
use log::{error, info, warn};
use shared::{ClassificationResponse, TrackingStatus};
use std::sync::Arc;
use uuid::Uuid;

use super::error::PipelineError;
use crate::db::tracking_repository::{TrackingRecord, TrackingStore, file_extension};
use crate::inference::render::{encode_jpeg, mask_to_image};
use crate::inference::{Dispatch, InferenceError, TaskResult};
use crate::upstream::preprocess_service::Preprocessor;

/// One upload, as received at the API boundary.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub file_name: String,
    pub task: String,
    pub raw_image: Vec<u8>,
}

impl InferenceRequest {
    pub fn new(file_name: String, task: String, raw_image: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name,
            task,
            raw_image,
        }
    }
}

/// Response body shape, which differs per task.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    Label(ClassificationResponse),
    Jpeg(Vec<u8>),
}

/// Validate, preprocess, infer, track, respond.
pub struct Orchestrator {
    preprocessor: Arc<dyn Preprocessor>,
    dispatcher: Arc<dyn Dispatch>,
    tracker: Arc<dyn TrackingStore>,
    allowed_extensions: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        preprocessor: Arc<dyn Preprocessor>,
        dispatcher: Arc<dyn Dispatch>,
        tracker: Arc<dyn TrackingStore>,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            preprocessor,
            dispatcher,
            tracker,
            allowed_extensions,
        }
    }

    pub fn is_allowed(&self, file_name: &str) -> bool {
        let extension = file_extension(file_name).to_ascii_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == extension)
    }

    pub async fn handle(&self, request: InferenceRequest) -> Result<InferenceOutput, PipelineError> {
        let InferenceRequest {
            id,
            file_name,
            task,
            raw_image,
        } = request;

        if !self.is_allowed(&file_name) {
            warn!("Rejected {} ({}): file type is not allowed", id, file_name);
            return Err(PipelineError::UnsupportedFileType(file_name));
        }

        let outcome = self.run(&file_name, &task, raw_image).await;
        let status = match &outcome {
            Ok(_) => TrackingStatus::Passed,
            Err(e) => {
                error!("Request {} ({}, task {}) failed: {}", id, file_name, task, e);
                TrackingStatus::Failed
            }
        };

        // Best effort: a tracking failure never changes what the caller receives.
        let record = TrackingRecord::new(id, &file_name, &task, status);
        if let Err(e) = self.tracker.record(&record).await {
            error!("Could not track request {} as {}: {}", id, status, e);
        }

        if outcome.is_ok() {
            info!("Request {} ({}, task {}) {}", id, file_name, task, status);
        }
        outcome
    }

    async fn run(
        &self,
        file_name: &str,
        task: &str,
        raw_image: Vec<u8>,
    ) -> Result<InferenceOutput, PipelineError> {
        let image = self.preprocessor.transform(file_name, raw_image).await?;

        let dispatcher = self.dispatcher.clone();
        let task = task.to_string();
        let output = actix_web::rt::task::spawn_blocking(move || -> Result<InferenceOutput, InferenceError> {
            let result = dispatcher.dispatch(&image, &task)?;
            shape_output(result)
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))??;

        Ok(output)
    }
}

/// Classification answers with JSON; the other tasks with a JPEG.
pub fn shape_output(result: TaskResult) -> Result<InferenceOutput, InferenceError> {
    match result {
        TaskResult::Label { category, .. } => {
            Ok(InferenceOutput::Label(ClassificationResponse::new(category)))
        }
        TaskResult::AnnotatedImage { pixels, .. } => {
            Ok(InferenceOutput::Jpeg(encode_jpeg(DynamicImage::ImageRgb8(pixels))?))
        }
        TaskResult::Mask { pixels } => Ok(InferenceOutput::Jpeg(encode_jpeg(
            DynamicImage::ImageLuma8(mask_to_image(&pixels)),
        )?)),
    }
}
