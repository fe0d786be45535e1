use async_trait::async_trait;
use image::RgbImage;
use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

const TRANSFORM_PATH: &str = "recieve_transform";

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Preprocessing service is unreachable: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Preprocessing service timed out after {0:?}")]
    Timeout(Duration),
    #[error("Preprocessing service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Preprocessing service returned an unreadable image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("Invalid preprocessing endpoint: {0}")]
    Url(#[from] url::ParseError),
}

impl PreprocessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PreprocessError::Timeout(_))
    }
}

/// Remote stage that normalizes an uploaded image before inference.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn transform(&self, file_name: &str, image: Vec<u8>) -> Result<RgbImage, PreprocessError>;

    /// Liveness probe against the service root.
    async fn ping(&self) -> Result<(), PreprocessError>;
}

#[derive(Clone)]
pub struct PreprocessClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl PreprocessClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> PreprocessError {
        if err.is_timeout() {
            PreprocessError::Timeout(self.timeout)
        } else {
            PreprocessError::Transport(err)
        }
    }
}

#[async_trait]
impl Preprocessor for PreprocessClient {
    async fn transform(&self, file_name: &str, image: Vec<u8>) -> Result<RgbImage, PreprocessError> {
        let url = self.base_url.join(TRANSFORM_PATH)?;
        let part = Part::bytes(image).file_name(file_name.to_string());
        let form = Form::new().part("image", part);

        debug!("Sending {} to {}", file_name, url);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        // Older preprocessing deployments report failures as a JSON body with 200.
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        if status != StatusCode::OK || is_json {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!("Preprocessing of {} failed with {}: {}", file_name, status, body);
            return Err(PreprocessError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let processed = image::load_from_memory(&body)?.to_rgb8();
        info!(
            "Image sent and processed successfully ({}x{})",
            processed.width(),
            processed.height()
        );
        Ok(processed)
    }

    async fn ping(&self) -> Result<(), PreprocessError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PreprocessError::Status {
                status: status.as_u16(),
                body: String::new(),
            })
        }
    }
}
