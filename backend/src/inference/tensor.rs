use image::RgbImage;
use tch::{Device, Kind, Tensor};

use super::InferenceError;

pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Converts an RGB image into a `[3, H, W]` float tensor in `[0, 1]`.
pub fn image_to_tensor(image: &RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    Tensor::from_slice(image.as_raw())
        .view([height as i64, width as i64, 3])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0
}

/// Channel-wise ImageNet normalization of a `[3, H, W]` tensor.
pub fn normalize(tensor: &Tensor) -> Tensor {
    let mean = Tensor::from_slice(&IMAGENET_MEAN)
        .to_kind(Kind::Float)
        .view([3, 1, 1]);
    let std = Tensor::from_slice(&IMAGENET_STD)
        .to_kind(Kind::Float)
        .view([3, 1, 1]);
    (tensor - mean) / std
}

/// Flattens a tensor of any shape into host `f32` values.
pub fn to_f32_vec(tensor: &Tensor) -> Result<Vec<f32>, InferenceError> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .view([-1]);
    Ok(Vec::<f32>::try_from(&flat)?)
}

pub fn to_i64_vec(tensor: &Tensor) -> Result<Vec<i64>, InferenceError> {
    let flat = tensor
        .to_device(Device::Cpu)
        .to_kind(Kind::Int64)
        .contiguous()
        .view([-1]);
    Ok(Vec::<i64>::try_from(&flat)?)
}

/// Index and value of the largest entry; the first index wins on ties.
pub fn stable_argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (index, value)| match best {
            Some((_, best_value)) if value <= best_value => best,
            _ => Some((index, value)),
        })
}
