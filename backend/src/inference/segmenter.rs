use image::RgbImage;
use ndarray::Array2;
use shared::Task;
use tch::{IValue, Kind, Tensor};

use super::tensor::{image_to_tensor, normalize, to_f32_vec};
use super::{
    InferenceError, InferenceVariant, ModelSource, TaskResult, Vocabulary, describe, dict_tensor,
    unexpected,
};
use crate::config::ConfigError;

/// Per-pixel probability of a single target class.
pub struct Segmenter {
    source: Box<dyn ModelSource>,
    target_class: String,
    target_index: usize,
}

impl Segmenter {
    pub fn new(
        source: Box<dyn ModelSource>,
        vocabulary: Vocabulary,
        target_class: &str,
    ) -> Result<Self, ConfigError> {
        let target_index = vocabulary
            .position(target_class)
            .ok_or_else(|| ConfigError::MissingTargetClass(target_class.to_string()))?;
        Ok(Self {
            source,
            target_class: target_class.to_string(),
            target_index,
        })
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// `logits` is `[1, classes, height, width]`.
    pub fn postprocess(
        &self,
        logits: &Tensor,
        height: u32,
        width: u32,
    ) -> Result<TaskResult, InferenceError> {
        let size = logits.size();
        let &[batch, classes, rows, cols] = size.as_slice() else {
            return Err(unexpected(format!("expected a 4-d mask, got shape {:?}", size)));
        };
        if batch < 1 || self.target_index as i64 >= classes {
            return Err(unexpected(format!(
                "mask shape {:?} has no channel for '{}'",
                size, self.target_class
            )));
        }
        if rows != height as i64 || cols != width as i64 {
            return Err(unexpected(format!(
                "mask is {}x{} but the input is {}x{}",
                cols, rows, width, height
            )));
        }

        let probabilities = logits
            .softmax(1, Kind::Float)
            .select(0, 0)
            .select(0, self.target_index as i64);
        let values = to_f32_vec(&probabilities)?
            .into_iter()
            .map(|v| v.clamp(0.0, 1.0))
            .collect();
        let pixels = Array2::from_shape_vec((rows as usize, cols as usize), values)?;
        Ok(TaskResult::Mask { pixels })
    }
}

impl InferenceVariant for Segmenter {
    fn task(&self) -> Task {
        Task::Segmentation
    }

    fn run_inference(&self, image: &RgbImage) -> Result<TaskResult, InferenceError> {
        let model = self.source.load()?;
        let batch = normalize(&image_to_tensor(image))
            .unsqueeze(0)
            .to_device(self.source.device());

        let output = tch::no_grad(|| model.run(&[IValue::Tensor(batch)]))?;
        let (height, width) = (image.height(), image.width());
        match &output {
            IValue::Tensor(logits) => self.postprocess(logits, height, width),
            // torchvision segmentation models return {"out": ..., "aux": ...}
            IValue::GenericDict(entries) => self.postprocess(dict_tensor(entries, "out")?, height, width),
            other => Err(unexpected(format!(
                "segmenter returned a {} instead of a mask",
                describe(other)
            ))),
        }
    }
}
