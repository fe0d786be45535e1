pub mod classifier;
pub mod detector;
pub mod labels;
pub mod render;
pub mod segmenter;
pub mod tensor;

use image::{Rgb, RgbImage};
use log::info;
use ndarray::Array2;
use shared::Task;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tch::{CModule, Device, IValue, TchError, Tensor};

pub use classifier::Classifier;
pub use detector::Detector;
pub use labels::Vocabulary;
pub use render::BoxStyle;
pub use segmenter::Segmenter;

use crate::config::{ConfigError, ModelManifest};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Unknown task '{0}', expected one of classification, detection, segmentation")]
    UnknownTask(String),
    #[error("Failed to load model {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: TchError,
    },
    #[error("Model error: {0}")]
    Model(#[from] TchError),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Mask shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub label: String,
    pub score: f32,
    pub color: Rgb<u8>,
}

/// Task-shaped output of one inference call.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Label { category: String, confidence: f32 },
    AnnotatedImage { pixels: RgbImage, overlays: Vec<Overlay> },
    Mask { pixels: Array2<f32> },
}

impl TaskResult {
    pub fn task(&self) -> Task {
        match self {
            TaskResult::Label { .. } => Task::Classification,
            TaskResult::AnnotatedImage { .. } => Task::Detection,
            TaskResult::Mask { .. } => Task::Segmentation,
        }
    }
}

/// A loaded TorchScript-style module.
pub trait ScriptModule {
    fn run(&self, inputs: &[IValue]) -> Result<IValue, TchError>;
}

impl ScriptModule for CModule {
    fn run(&self, inputs: &[IValue]) -> Result<IValue, TchError> {
        self.forward_is(inputs)
    }
}

/// Produces a fresh module for every call; nothing is cached between requests.
pub trait ModelSource: Send + Sync {
    fn load(&self) -> Result<Box<dyn ScriptModule>, InferenceError>;

    fn device(&self) -> Device {
        Device::Cpu
    }
}

pub struct TorchScriptFile {
    path: PathBuf,
    device: Device,
}

impl TorchScriptFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            device: Device::cuda_if_available(),
        }
    }
}

impl ModelSource for TorchScriptFile {
    fn load(&self) -> Result<Box<dyn ScriptModule>, InferenceError> {
        let mut module = CModule::load_on_device(&self.path, self.device).map_err(|source| {
            InferenceError::ModelLoad {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        module.set_eval();
        Ok(Box::new(module))
    }

    fn device(&self) -> Device {
        self.device
    }
}

/// Capability shared by the classifier, detector and segmenter.
pub trait InferenceVariant: Send + Sync {
    fn task(&self) -> Task;

    fn run_inference(&self, image: &RgbImage) -> Result<TaskResult, InferenceError>;
}

/// Runs the variant selected by a raw task identifier.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, image: &RgbImage, task: &str) -> Result<TaskResult, InferenceError>;
}

pub struct TaskDispatcher {
    classifier: Classifier,
    detector: Detector,
    segmenter: Segmenter,
}

impl TaskDispatcher {
    pub fn new(classifier: Classifier, detector: Detector, segmenter: Segmenter) -> Self {
        Self {
            classifier,
            detector,
            segmenter,
        }
    }

    /// Validates vocabularies and drawing resources up front so that
    /// configuration problems fail the process at startup.
    pub fn from_manifest(manifest: &ModelManifest) -> Result<Self, ConfigError> {
        let spec = &manifest.classification;
        let classifier = Classifier::new(
            Box::new(TorchScriptFile::new(&spec.model)),
            Vocabulary::load(&spec.labels)?,
        );

        let spec = &manifest.detection;
        let style = BoxStyle::new(spec.box_color, spec.line_width, spec.font_size);
        let style = match &spec.font_path {
            Some(font_path) => style.with_font_path(font_path)?,
            None => style.with_bundled_font()?,
        };
        let detector = Detector::new(
            Box::new(TorchScriptFile::new(&spec.model)),
            Vocabulary::load(&spec.labels)?,
            spec.score_threshold,
            style,
        );

        let spec = &manifest.segmentation;
        let segmenter = Segmenter::new(
            Box::new(TorchScriptFile::new(&spec.model)),
            Vocabulary::load(&spec.labels)?,
            &spec.target_class,
        )?;
        info!("Segmentation target class: {}", segmenter.target_class());

        Ok(Self::new(classifier, detector, segmenter))
    }

    pub fn variant(&self, task: Task) -> &dyn InferenceVariant {
        match task {
            Task::Classification => &self.classifier,
            Task::Detection => &self.detector,
            Task::Segmentation => &self.segmenter,
        }
    }
}

impl Dispatch for TaskDispatcher {
    fn dispatch(&self, image: &RgbImage, task: &str) -> Result<TaskResult, InferenceError> {
        let task = Task::from_str(task).map_err(|_| InferenceError::UnknownTask(task.to_string()))?;
        let variant = self.variant(task);
        info!("Performing {}", variant.task());
        variant.run_inference(image)
    }
}

pub(crate) fn unexpected(message: impl Into<String>) -> InferenceError {
    InferenceError::UnexpectedOutput(message.into())
}

pub(crate) fn describe(value: &IValue) -> &'static str {
    match value {
        IValue::None => "none",
        IValue::Tensor(_) => "tensor",
        IValue::Double(_) | IValue::Int(_) | IValue::Bool(_) => "scalar",
        IValue::Tuple(_) => "tuple",
        IValue::IntList(_) | IValue::DoubleList(_) | IValue::BoolList(_) => "scalar list",
        IValue::String(_) => "string",
        IValue::TensorList(_) => "tensor list",
        IValue::GenericList(_) => "list",
        IValue::GenericDict(_) => "dict",
        _ => "object",
    }
}

/// Looks up a tensor-valued entry of a `Dict[str, Tensor]` model output.
pub(crate) fn dict_tensor<'a>(
    entries: &'a [(IValue, IValue)],
    key: &str,
) -> Result<&'a Tensor, InferenceError> {
    entries
        .iter()
        .find_map(|(k, v)| match (k, v) {
            (IValue::String(name), IValue::Tensor(tensor)) if name == key => Some(tensor),
            _ => None,
        })
        .ok_or_else(|| unexpected(format!("output has no '{}' tensor", key)))
}
