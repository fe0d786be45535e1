#![allow(dead_code)]

use async_trait::async_trait;
use backend::db::tracking_repository::{TrackingError, TrackingRecord, TrackingStore};
use backend::inference::{Dispatch, InferenceError, TaskResult};
use backend::upstream::preprocess_service::{PreprocessError, Preprocessor};
use image::{Rgb, RgbImage};
use shared::Task;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const BOUNDARY: &str = "----inference-test-boundary";

/// Builds a multipart body with a single `image` part.
pub fn multipart_body(file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub struct FakePreprocessor {
    pub calls: AtomicUsize,
    pub healthy: AtomicBool,
}

impl FakePreprocessor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Preprocessor for FakePreprocessor {
    async fn transform(&self, _file_name: &str, _image: Vec<u8>) -> Result<RgbImage, PreprocessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RgbImage::from_pixel(224, 224, Rgb([120, 80, 40])))
    }

    async fn ping(&self) -> Result<(), PreprocessError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PreprocessError::Timeout(Duration::from_secs(1)))
        }
    }
}

/// Answers like the real dispatcher without loading any model.
pub struct FakeDispatcher {
    pub fail: AtomicBool,
}

impl FakeDispatcher {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

impl Dispatch for FakeDispatcher {
    fn dispatch(&self, image: &RgbImage, task: &str) -> Result<TaskResult, InferenceError> {
        let task = Task::from_str(task).map_err(|_| InferenceError::UnknownTask(task.to_string()))?;
        if self.fail.load(Ordering::SeqCst) {
            return Err(InferenceError::UnexpectedOutput("model produced no output".into()));
        }
        Ok(match task {
            Task::Classification => TaskResult::Label {
                category: "tabby".into(),
                confidence: 0.87,
            },
            Task::Detection => TaskResult::AnnotatedImage {
                pixels: image.clone(),
                overlays: Vec::new(),
            },
            Task::Segmentation => TaskResult::Mask {
                pixels: ndarray::Array2::from_elem((image.height() as usize, image.width() as usize), 0.5),
            },
        })
    }
}

pub struct MemoryTracker {
    pub records: Mutex<Vec<TrackingRecord>>,
    pub fail: AtomicBool,
    pub healthy: AtomicBool,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn records(&self) -> Vec<TrackingRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingStore for MemoryTracker {
    async fn ensure_schema(&self) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn record(&self, record: &TrackingRecord) -> Result<(), TrackingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackingError::Timeout(Duration::from_secs(5)));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TrackingError::Timeout(Duration::from_secs(5)))
        }
    }
}

pub fn allowed_extensions() -> Vec<String> {
    vec!["jpg".into(), "jpeg".into(), "png".into()]
}
