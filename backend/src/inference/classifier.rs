use image::RgbImage;
use log::info;
use shared::Task;
use tch::{IValue, Kind, Tensor};

use super::tensor::{image_to_tensor, normalize, stable_argmax, to_f32_vec};
use super::{InferenceError, InferenceVariant, ModelSource, TaskResult, Vocabulary, describe, unexpected};

/// Softmax over the logits, arg-max, then category lookup.
pub struct Classifier {
    source: Box<dyn ModelSource>,
    vocabulary: Vocabulary,
}

impl Classifier {
    pub fn new(source: Box<dyn ModelSource>, vocabulary: Vocabulary) -> Self {
        Self { source, vocabulary }
    }

    pub fn postprocess(&self, logits: &Tensor) -> Result<TaskResult, InferenceError> {
        let probabilities = to_f32_vec(&logits.flatten(0, -1).softmax(-1, Kind::Float))?;
        let (class_id, score) =
            stable_argmax(&probabilities).ok_or_else(|| unexpected("classifier produced no scores"))?;
        let category = self.vocabulary.get(class_id).ok_or_else(|| {
            unexpected(format!(
                "class index {} is outside the vocabulary of {} categories",
                class_id,
                self.vocabulary.len()
            ))
        })?;

        info!("Classification score: {}", score);
        Ok(TaskResult::Label {
            category: category.to_string(),
            confidence: score.clamp(0.0, 1.0),
        })
    }
}

impl InferenceVariant for Classifier {
    fn task(&self) -> Task {
        Task::Classification
    }

    fn run_inference(&self, image: &RgbImage) -> Result<TaskResult, InferenceError> {
        let model = self.source.load()?;
        let batch = normalize(&image_to_tensor(image))
            .unsqueeze(0)
            .to_device(self.source.device());

        let output = tch::no_grad(|| model.run(&[IValue::Tensor(batch)]))?;
        match output {
            IValue::Tensor(logits) => self.postprocess(&logits),
            other => Err(unexpected(format!(
                "classifier returned a {} instead of a tensor",
                describe(&other)
            ))),
        }
    }
}
