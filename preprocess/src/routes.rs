use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use futures::TryStreamExt;
use log::{error, info};
use shared::{ErrorResponse, HealthResponse, HealthState};

use crate::transform::{TransformError, process_image};

impl ResponseError for TransformError {
    fn status_code(&self) -> StatusCode {
        match self {
            TransformError::Decode(_)
            | TransformError::Upload(_)
            | TransformError::AspectRatio { .. } => StatusCode::BAD_REQUEST,
            TransformError::Encode(_) | TransformError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/recieve_transform").route(web::post().to(receive_transform)))
        .service(web::resource("/").route(web::get().to(liveness)))
        .service(web::resource("/health").route(web::get().to(liveness)));
}

async fn receive_transform(mut payload: Multipart) -> Result<HttpResponse, TransformError> {
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| TransformError::Upload(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| TransformError::Upload(e.to_string()))?
        {
            data.extend_from_slice(&chunk);
        }
        image_data = Some(data);
        break;
    }

    let image_data = image_data.ok_or_else(|| TransformError::Upload("missing 'image' field".into()))?;

    // Decoding and resampling are CPU bound.
    let processed = web::block(move || process_image(&image_data))
        .await
        .map_err(|e| TransformError::Worker(e.to_string()))?
        .inspect_err(|e| error!("{}", e))?;

    info!("Transformed image ({} bytes)", processed.len());
    Ok(HttpResponse::Ok().content_type("image/jpeg").body(processed))
}

async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse::new(HealthState::Ok, Vec::new()))
}
