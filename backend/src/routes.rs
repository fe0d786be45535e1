use actix_multipart::Multipart;
use actix_web::error::InternalError;
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::info;
use serde::Deserialize;
use shared::ErrorResponse;

use crate::health::{DependencyUnhealthy, HealthMonitor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::orchestrator::{InferenceOutput, InferenceRequest, Orchestrator};

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Deserialize)]
pub struct InferenceQuery {
    pub task: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let body = ErrorResponse::new(err.to_string());
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    }))
    .service(web::resource("/inference").route(web::post().to(handle_inference)))
    .service(web::resource("/health").route(web::get().to(health_check)));
}

async fn handle_inference(
    orchestrator: web::Data<Orchestrator>,
    query: web::Query<InferenceQuery>,
    payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    let (file_name, raw_image) = read_image_field(payload).await?;
    let request = InferenceRequest::new(file_name, query.into_inner().task, raw_image);
    info!(
        "Inference request {} for {} ({})",
        request.id, request.file_name, request.task
    );

    match orchestrator.handle(request).await? {
        InferenceOutput::Label(label) => Ok(HttpResponse::Ok().json(label)),
        InferenceOutput::Jpeg(bytes) => Ok(HttpResponse::Ok().content_type("image/jpeg").body(bytes)),
    }
}

/// Collects the `image` part of the upload together with its filename.
async fn read_image_field(mut payload: Multipart) -> Result<(String, Vec<u8>), PipelineError> {
    let invalid = |e: actix_multipart::MultipartError| PipelineError::InvalidUpload(e.to_string());

    while let Some(mut field) = payload.try_next().await.map_err(invalid)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::InvalidUpload("the image part has no filename".into()))?;

        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(invalid)? {
            image_data.extend_from_slice(&chunk);
        }
        if image_data.is_empty() {
            return Err(PipelineError::InvalidUpload(format!("{} is empty", file_name)));
        }
        return Ok((file_name, image_data));
    }

    Err(PipelineError::InvalidUpload(format!(
        "missing '{}' file field",
        IMAGE_FIELD
    )))
}

async fn health_check(monitor: web::Data<HealthMonitor>) -> Result<HttpResponse, DependencyUnhealthy> {
    let response = monitor.check_health().await.into_result()?;
    Ok(HttpResponse::Ok().json(response))
}
