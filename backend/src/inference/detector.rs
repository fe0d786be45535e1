use image::RgbImage;
use shared::Task;
use tch::IValue;

use super::render::{BoxStyle, draw_overlays};
use super::tensor::{image_to_tensor, to_f32_vec, to_i64_vec};
use super::{
    BoundingBox, InferenceError, InferenceVariant, ModelSource, Overlay, TaskResult, Vocabulary,
    describe, dict_tensor, unexpected,
};

/// Flattened detector output for a single image.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetections {
    /// `[x_min, y_min, x_max, y_max]` per detection.
    pub boxes: Vec<f32>,
    pub labels: Vec<i64>,
    pub scores: Vec<f32>,
}

pub struct Detector {
    source: Box<dyn ModelSource>,
    vocabulary: Vocabulary,
    score_threshold: f32,
    style: BoxStyle,
}

impl Detector {
    pub fn new(
        source: Box<dyn ModelSource>,
        vocabulary: Vocabulary,
        score_threshold: f32,
        style: BoxStyle,
    ) -> Self {
        Self {
            source,
            vocabulary,
            score_threshold,
            style,
        }
    }

    pub fn style(&self) -> &BoxStyle {
        &self.style
    }

    /// Keeps detections scoring at least the threshold and names them.
    pub fn postprocess(&self, raw: &RawDetections) -> Result<Vec<Overlay>, InferenceError> {
        raw.scores
            .iter()
            .enumerate()
            .filter(|(_, score)| **score >= self.score_threshold)
            .map(|(i, &score)| {
                let class_id = *raw
                    .labels
                    .get(i)
                    .ok_or_else(|| unexpected(format!("detection {} has no label", i)))?;
                let b = raw
                    .boxes
                    .get(i * 4..i * 4 + 4)
                    .ok_or_else(|| unexpected(format!("detection {} has no box", i)))?;
                let label = usize::try_from(class_id)
                    .ok()
                    .and_then(|index| self.vocabulary.get(index))
                    .ok_or_else(|| unexpected(format!("unknown detection label {}", class_id)))?;
                Ok(Overlay {
                    bbox: BoundingBox {
                        x_min: b[0],
                        y_min: b[1],
                        x_max: b[2],
                        y_max: b[3],
                    },
                    label: label.to_string(),
                    score,
                    color: self.style.color,
                })
            })
            .collect()
    }
}

/// Accepts the scripted torchvision shape `(losses, [detections])`, a bare
/// `[detections]` list, or a single detections dict.
pub fn parse_detections(output: IValue) -> Result<RawDetections, InferenceError> {
    let detections = match output {
        IValue::Tuple(items) => items
            .into_iter()
            .last()
            .ok_or_else(|| unexpected("detector returned an empty tuple"))?,
        other => other,
    };

    let entries = match detections {
        IValue::GenericList(items) => match items.into_iter().next() {
            Some(IValue::GenericDict(entries)) => entries,
            Some(other) => {
                return Err(unexpected(format!(
                    "expected a detections dict, got a {}",
                    describe(&other)
                )));
            }
            None => return Err(unexpected("detector returned no results")),
        },
        IValue::GenericDict(entries) => entries,
        other => {
            return Err(unexpected(format!(
                "detector returned a {} instead of detections",
                describe(&other)
            )));
        }
    };

    let boxes = to_f32_vec(dict_tensor(&entries, "boxes")?)?;
    let labels = to_i64_vec(dict_tensor(&entries, "labels")?)?;
    let scores = to_f32_vec(dict_tensor(&entries, "scores")?)?;

    if labels.len() != scores.len() || boxes.len() != scores.len() * 4 {
        return Err(unexpected(format!(
            "mismatched detection lengths: {} boxes, {} labels, {} scores",
            boxes.len() / 4,
            labels.len(),
            scores.len()
        )));
    }

    Ok(RawDetections {
        boxes,
        labels,
        scores,
    })
}

impl InferenceVariant for Detector {
    fn task(&self) -> Task {
        Task::Detection
    }

    fn run_inference(&self, image: &RgbImage) -> Result<TaskResult, InferenceError> {
        let model = self.source.load()?;
        let input = image_to_tensor(image).to_device(self.source.device());

        let output = tch::no_grad(|| model.run(&[IValue::TensorList(vec![input])]))?;
        let overlays = self.postprocess(&parse_detections(output)?)?;
        log::info!("Detected {} objects", overlays.len());

        let mut pixels = image.clone();
        draw_overlays(&mut pixels, &overlays, &self.style);
        Ok(TaskResult::AnnotatedImage { pixels, overlays })
    }
}
