use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use ndarray::Array2;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::{BoundingBox, Overlay};
use crate::config::ConfigError;

// DejaVu Sans, used for detection labels unless the manifest names another font.
const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// How detections are drawn onto the output image.
#[derive(Clone)]
pub struct BoxStyle {
    pub color: Rgb<u8>,
    pub line_width: u32,
    pub font_size: f32,
    pub font: Option<Arc<FontVec>>,
}

impl BoxStyle {
    pub fn new(color: [u8; 3], line_width: u32, font_size: f32) -> Self {
        Self {
            color: Rgb(color),
            line_width: line_width.max(1),
            font_size,
            font: None,
        }
    }

    pub fn with_font_path(mut self, path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| ConfigError::Font(path.display().to_string()))?;
        self.font = Some(Arc::new(font));
        Ok(self)
    }

    pub fn with_bundled_font(mut self) -> Result<Self, ConfigError> {
        let font = FontVec::try_from_vec(BUNDLED_FONT.to_vec())
            .map_err(|_| ConfigError::Font("bundled DejaVuSans.ttf".to_string()))?;
        self.font = Some(Arc::new(font));
        Ok(self)
    }
}

/// Draws every overlay's box, and its label when a font is available.
pub fn draw_overlays(canvas: &mut RgbImage, overlays: &[Overlay], style: &BoxStyle) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    for overlay in overlays {
        let Some(rect) = to_rect(&overlay.bbox, width, height) else {
            continue;
        };

        for inset in 0..style.line_width as i32 {
            let w = rect.width() as i32 - 2 * inset;
            let h = rect.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, ring, overlay.color);
        }

        if let Some(font) = &style.font {
            let text_y = (rect.top() - style.font_size as i32).max(0);
            draw_text_mut(
                canvas,
                overlay.color,
                rect.left(),
                text_y,
                PxScale::from(style.font_size),
                font.as_ref(),
                &overlay.label,
            );
        }
    }
}

// Clamps a box to the canvas; None when nothing of it is visible.
fn to_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if ![bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max].iter().all(|v| v.is_finite()) {
        return None;
    }
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    if bbox.x_max < 0.0 || bbox.y_max < 0.0 || bbox.x_min > max_x || bbox.y_min > max_y {
        return None;
    }
    let x0 = bbox.x_min.clamp(0.0, max_x).round() as i32;
    let y0 = bbox.y_min.clamp(0.0, max_y).round() as i32;
    let x1 = bbox.x_max.clamp(0.0, max_x).round() as i32;
    let y1 = bbox.y_max.clamp(0.0, max_y).round() as i32;
    if x1 < x0 || y1 < y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32))
}

/// Scales a `[0, 1]` probability mask to an 8-bit grayscale image.
pub fn mask_to_image(mask: &Array2<f32>) -> GrayImage {
    let (rows, cols) = mask.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let value = mask[[y as usize, x as usize]].clamp(0.0, 1.0);
        Luma([(value * 255.0).round() as u8])
    })
}

pub fn encode_jpeg(image: DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Overlay {
        Overlay {
            bbox: BoundingBox { x_min, y_min, x_max, y_max },
            label: "cat".to_string(),
            score: 0.95,
            color: Rgb([255, 0, 0]),
        }
    }

    #[test]
    fn draws_box_outline_with_configured_width() {
        let mut canvas = RgbImage::new(40, 40);
        let style = BoxStyle::new([255, 0, 0], 2, 30.0);
        draw_overlays(&mut canvas, &[overlay(10.0, 10.0, 29.0, 29.0)], &style);

        assert_eq!(canvas.get_pixel(10, 10), &Rgb([255, 0, 0]));
        assert_eq!(canvas.get_pixel(11, 20), &Rgb([255, 0, 0]));
        assert_eq!(canvas.get_pixel(12, 20), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(29, 29), &Rgb([255, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_canvas_are_clamped() {
        let mut canvas = RgbImage::new(20, 20);
        let style = BoxStyle::new([255, 0, 0], 1, 30.0);
        draw_overlays(&mut canvas, &[overlay(-5.0, -5.0, 100.0, 100.0)], &style);

        assert_eq!(canvas.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(canvas.get_pixel(19, 19), &Rgb([255, 0, 0]));
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_entirely_off_canvas_are_skipped() {
        let mut canvas = RgbImage::new(20, 20);
        let style = BoxStyle::new([255, 0, 0], 1, 30.0);
        let off_canvas = [
            overlay(-30.0, 2.0, -10.0, 12.0),
            overlay(2.0, 25.0, 12.0, 40.0),
            overlay(21.0, 2.0, 35.0, 12.0),
        ];
        for o in &off_canvas {
            assert!(to_rect(&o.bbox, 20, 20).is_none());
        }

        draw_overlays(&mut canvas, &off_canvas, &style);
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn label_is_drawn_above_the_box() {
        let style = BoxStyle::new([255, 0, 0], 2, 30.0).with_bundled_font().unwrap();
        assert!(style.font.is_some());

        let mut canvas = RgbImage::new(100, 100);
        draw_overlays(&mut canvas, &[overlay(10.0, 50.0, 80.0, 90.0)], &style);

        // The text band sits between y = 20 and the top edge of the box.
        let labelled = (10..80)
            .flat_map(|x| (20..48).map(move |y| (x, y)))
            .any(|(x, y)| canvas.get_pixel(x, y)[0] > 0);
        assert!(labelled);

        let mut unlabelled = RgbImage::new(100, 100);
        let plain = BoxStyle::new([255, 0, 0], 2, 30.0);
        draw_overlays(&mut unlabelled, &[overlay(10.0, 50.0, 80.0, 90.0)], &plain);
        assert!((10..80).all(|x| (20..48).all(|y| unlabelled.get_pixel(x, y)[0] == 0)));
    }

    #[test]
    fn mask_values_map_to_grayscale() {
        let mask = Array2::from_shape_vec((1, 3), vec![0.0, 0.5, 1.0]).unwrap();
        let image = mask_to_image(&mask);
        assert_eq!(image.dimensions(), (3, 1));
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(1, 0)[0], 128);
        assert_eq!(image.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn encodes_jpeg() {
        let bytes = encode_jpeg(DynamicImage::ImageRgb8(RgbImage::new(8, 8))).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
