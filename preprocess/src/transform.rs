use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const RESIZE_SHORTER_SIDE: u32 = 256;
pub const CROP_SIZE: u32 = 224;
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Largest accepted longer-to-shorter side ratio (integer part).
pub const MAX_ASPECT_RATIO: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to process image {0}")]
    Decode(#[source] ImageError),
    #[error("Failed to process image {0}")]
    Encode(#[source] ImageError),
    #[error("Failed to process image {0}")]
    Upload(String),
    #[error("Failed to process image {0}")]
    Worker(String),
    #[error("Failed to process image of {width}x{height}: aspect ratio exceeds 16:1")]
    AspectRatio { width: u32, height: u32 },
}

/// Decode, resize, crop, normalize and re-encode an uploaded image as JPEG.
pub fn process_image(raw: &[u8]) -> Result<Vec<u8>, TransformError> {
    let decoded = image::load_from_memory(raw).map_err(TransformError::Decode)?;
    let resized = resize_shorter_side(&decoded.to_rgb8(), RESIZE_SHORTER_SIDE)?;
    let cropped = center_crop(&resized, CROP_SIZE, CROP_SIZE);
    let normalized = normalize_to_image(&cropped);
    encode_jpeg(normalized).map_err(TransformError::Encode)
}

/// Scales the image so its shorter side equals `target`, keeping the aspect ratio.
pub fn resize_shorter_side(image: &RgbImage, target: u32) -> Result<RgbImage, TransformError> {
    let (width, height) = image.dimensions();
    let (shorter, longer) = (width.min(height), width.max(height));
    if shorter == 0 || longer / shorter > MAX_ASPECT_RATIO {
        return Err(TransformError::AspectRatio { width, height });
    }

    // Below target * (MAX_ASPECT_RATIO + 1), so the narrowing cast cannot truncate.
    let scaled = (target as u64 * longer as u64 / shorter as u64) as u32;
    let (new_width, new_height) = if width <= height {
        (target, scaled)
    } else {
        (scaled, target)
    };
    Ok(resize(image, new_width, new_height))
}

/// Bilinear resize to an exact size.
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(image, width, height, FilterType::Triangle)
}

pub fn center_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_width, src_height) = image.dimensions();
    let x = ((src_width as f64 - width as f64) / 2.0).round() as i64;
    let y = ((src_height as f64 - height as f64) / 2.0).round() as i64;
    crop(image, x, y, width, height)
}

/// Cuts a `width`x`height` window whose top-left corner is at (`x`, `y`).
/// Parts of the window outside the source stay black.
pub fn crop(image: &RgbImage, x: i64, y: i64, width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    imageops::overlay(&mut canvas, image, -x, -y);
    canvas
}

/// Applies ImageNet normalization and maps the result back to 8-bit,
/// clamping to [0, 1] first.
pub fn normalize_to_image(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for (channel, value) in pixel.0.iter_mut().enumerate() {
            let normalized = (*value as f32 / 255.0 - MEAN[channel]) / STD[channel];
            *value = (normalized.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
    out
}

pub fn encode_jpeg(image: RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}
