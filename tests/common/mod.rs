#![allow(dead_code)]

use image::{DynamicImage, ImageBuffer, Rgba};
use nalgebra::DVector;
use std::path::Path;
use unblend::color::{Color, normalize_color};
use unblend::{BlendMode, CompositeOperator, LayerStack};

/// One synthetic layer: its color and an alpha ramp across the image width
#[derive(Debug, Clone, Copy)]
pub struct SyntheticLayer {
    pub mode: BlendMode,
    pub color: Color,
    pub alpha_left: f64,
    pub alpha_right: f64,
}

impl SyntheticLayer {
    pub fn opaque(color: Color) -> Self {
        Self {
            mode: BlendMode::Normal,
            color,
            alpha_left: 1.0,
            alpha_right: 1.0,
        }
    }

    pub fn ramp(mode: BlendMode, color: Color, alpha_left: f64, alpha_right: f64) -> Self {
        Self {
            mode,
            color,
            alpha_left,
            alpha_right,
        }
    }

    fn alpha_at(&self, x: u32, width: u32) -> f64 {
        let t = if width > 1 {
            x as f64 / (width - 1) as f64
        } else {
            0.0
        };
        self.alpha_left + (self.alpha_right - self.alpha_left) * t
    }
}

/// Flatten synthetic source-over layers (bottom first) into an opaque image
pub fn render_layers(layers: &[SyntheticLayer], width: u32, height: u32) -> DynamicImage {
    let operators = vec![CompositeOperator::SourceOver; layers.len()];
    let modes: Vec<BlendMode> = layers.iter().map(|layer| layer.mode).collect();
    let stack = LayerStack::new(&operators, &modes).unwrap();
    let colors = DVector::from_iterator(
        3 * layers.len(),
        layers.iter().flat_map(|layer| normalize_color(layer.color)),
    );

    let image = ImageBuffer::from_fn(width, height, |x, _| {
        let alphas =
            DVector::from_iterator(layers.len(), layers.iter().map(|l| l.alpha_at(x, width)));
        let composite = stack.composite(&alphas, &colors, false).unwrap();
        Rgba([
            to_channel(composite[0]),
            to_channel(composite[1]),
            to_channel(composite[2]),
            255,
        ])
    });
    DynamicImage::ImageRgba8(image)
}

fn to_channel(value: f64) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

pub fn save_image(image: &DynamicImage, path: &Path) {
    image.save(path).unwrap();
}

/// Compare two images using image-compare library's hybrid comparison
///
/// Returns a score between 0.0 and 1.0 where 1.0 is identical
pub fn compare_images(img1: &DynamicImage, img2: &DynamicImage) -> Result<f64, String> {
    let rgb1 = img1.to_rgb8();
    let rgb2 = img2.to_rgb8();

    match image_compare::rgb_hybrid_compare(&rgb1, &rgb2) {
        Ok(result) => Ok(result.score),
        Err(_) => Err("Images must have same dimensions".to_string()),
    }
}

/// Calculate similarity percentage (0-100%) between two images
pub fn calculate_similarity_percentage(img1: &DynamicImage, img2: &DynamicImage) -> f64 {
    match compare_images(img1, img2) {
        Ok(score) => score * 100.0,
        Err(_) => 0.0,
    }
}

/// PSNR over the RGB channels
pub fn calculate_psnr(img1: &DynamicImage, img2: &DynamicImage) -> f64 {
    let rgba1 = img1.to_rgba8();
    let rgba2 = img2.to_rgba8();

    let mut sum_squared_diff = 0.0;
    let mut sample_count = 0;

    for (p1, p2) in rgba1.pixels().zip(rgba2.pixels()) {
        for i in 0..3 {
            let diff = p1[i] as f64 - p2[i] as f64;
            sum_squared_diff += diff * diff;
            sample_count += 1;
        }
    }

    let mse = sum_squared_diff / sample_count as f64;
    if mse == 0.0 {
        return f64::INFINITY;
    }

    20.0 * (255.0 / mse.sqrt()).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_images_have_perfect_similarity() {
        let img = DynamicImage::new_rgba8(10, 10);
        assert_eq!(calculate_similarity_percentage(&img, &img), 100.0);
        assert_eq!(calculate_psnr(&img, &img), f64::INFINITY);
    }

    #[test]
    fn test_render_layers() {
        let layers = [
            SyntheticLayer::opaque([255, 255, 255]),
            SyntheticLayer::ramp(BlendMode::Multiply, [255, 0, 0], 0.0, 1.0),
        ];
        let image = render_layers(&layers, 3, 1).to_rgba8();

        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([255, 128, 128, 255]));
        assert_eq!(image.get_pixel(2, 0), &Rgba([255, 0, 0, 255]));
    }
}
