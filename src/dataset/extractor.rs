//! Image feature extraction.
//!
//! The builder only depends on [`FeatureExtractor`]; [`ColorTextureExtractor`]
//! is the production implementation built on the `image` crate.

use image::{DynamicImage, GenericImageView, imageops::FilterType};

use super::annotations::BoundingBox;
use super::labeled::{CLASSIFIER_FEATURE_COUNT, DETECTOR_FEATURE_COUNT, GLCM_ANGLES, GLCM_DISTANCES};

/// Turns encoded image bytes into fixed-length feature vectors.
pub trait FeatureExtractor {
    /// Whole-image detector features.
    fn extract_image(&self, image: &[u8]) -> Result<Vec<f32>, String>;

    /// Features for one relative bounding box of the image.
    fn extract_region(&self, image: &[u8], bbox: &BoundingBox) -> Result<Vec<f32>, String>;
}

/// Colour statistics, shape ratios and GLCM texture descriptors.
#[derive(Debug, Clone)]
pub struct ColorTextureExtractor {
    /// Longest side after resizing for whole-image statistics.
    pub image_size: u32,
    /// Longest side after resizing a cropped region.
    pub region_size: u32,
    /// Grey-level quantisation for the co-occurrence matrix.
    pub glcm_levels: usize,
}

impl Default for ColorTextureExtractor {
    fn default() -> Self {
        Self {
            image_size: 128,
            region_size: 64,
            glcm_levels: 8,
        }
    }
}

impl FeatureExtractor for ColorTextureExtractor {
    fn extract_image(&self, image: &[u8]) -> Result<Vec<f32>, String> {
        let img = decode(image)?;
        let (width, height) = img.dimensions();
        let resized = img.resize(self.image_size, self.image_size, FilterType::Lanczos3);
        let mut features = color_statistics(&resized).to_vec();
        let (aspect_ratio, circularity) = shape_features(width, height);
        features.push(aspect_ratio);
        features.push(circularity);
        debug_assert_eq!(features.len(), DETECTOR_FEATURE_COUNT);
        Ok(features)
    }

    fn extract_region(&self, image: &[u8], bbox: &BoundingBox) -> Result<Vec<f32>, String> {
        let img = decode(image)?;
        let (width, height) = img.dimensions();
        let crop = crop_rect(width, height, bbox)
            .ok_or_else(|| format!("Bounding box {bbox:?} is empty inside {width}x{height}"))?;
        let region = img
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .resize(self.region_size, self.region_size, FilterType::Lanczos3);
        let mut features = color_statistics(&region).to_vec();
        features.extend(texture_features(&region, self.glcm_levels));
        if features.len() != CLASSIFIER_FEATURE_COUNT {
            return Err(format!(
                "Expected {CLASSIFIER_FEATURE_COUNT} region features, computed {}",
                features.len()
            ));
        }
        Ok(features)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, String> {
    let img = image::load_from_memory(bytes).map_err(|err| err.to_string())?;
    if img.width() == 0 || img.height() == 0 {
        return Err("Image has no pixels".to_string());
    }
    Ok(img)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Absolute crop for a relative box, clamped to the image.
fn crop_rect(width: u32, height: u32, bbox: &BoundingBox) -> Option<CropRect> {
    if !bbox.is_valid() {
        return None;
    }
    let (w, h) = (width as f32, height as f32);
    let x = ((bbox.cx - bbox.w / 2.0) * w).max(0.0);
    let y = ((bbox.cy - bbox.h / 2.0) * h).max(0.0);
    let crop_w = (bbox.w * w).min(w - x);
    let crop_h = (bbox.h * h).min(h - y);
    let rect = CropRect {
        x: x.round() as u32,
        y: y.round() as u32,
        width: crop_w.round() as u32,
        height: crop_h.round() as u32,
    };
    if rect.width == 0 || rect.height == 0 || rect.x >= width || rect.y >= height {
        return None;
    }
    Some(CropRect {
        width: rect.width.min(width - rect.x),
        height: rect.height.min(height - rect.y),
        ..rect
    })
}

/// Per-channel mean and standard deviation on the 0..255 scale:
/// `[r_mean, g_mean, b_mean, r_std, g_std, b_std]`.
fn color_statistics(img: &DynamicImage) -> [f32; 6] {
    let rgb = img.to_rgb8();
    let n = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
    let mut sum = [0f64; 3];
    let mut sum_sq = [0f64; 3];
    for pixel in rgb.pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f64;
            sum[c] += v;
            sum_sq[c] += v * v;
        }
    }
    let mut out = [0f32; 6];
    for c in 0..3 {
        let mean = sum[c] / n;
        let var = (sum_sq[c] / n - mean * mean).max(0.0);
        out[c] = mean as f32;
        out[c + 3] = var.sqrt() as f32;
    }
    out
}

/// `(height / width, 4πA / P²)` of the bounding rectangle, rounded to 4 places.
fn shape_features(width: u32, height: u32) -> (f32, f32) {
    if width == 0 || height == 0 {
        return (1.0, 0.0);
    }
    let (w, h) = (width as f64, height as f64);
    let perimeter = 2.0 * (w + h);
    let circularity = 4.0 * std::f64::consts::PI * w * h / (perimeter * perimeter);
    (round4(h / w), round4(circularity))
}

fn round4(value: f64) -> f32 {
    ((value * 10_000.0).round() / 10_000.0) as f32
}

/// Haralick contrast, correlation, energy and homogeneity for every
/// distance/angle pair, distance-major.
fn texture_features(img: &DynamicImage, levels: usize) -> Vec<f32> {
    let gray = img.to_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let max = gray.pixels().map(|p| p.0[0]).max().unwrap_or(0).max(1) as f32;
    let top = (levels.max(2) - 1) as f32;
    let quantised: Vec<usize> = gray
        .pixels()
        .map(|p| ((p.0[0] as f32 / max) * top).clamp(0.0, top) as usize)
        .collect();

    let mut out = Vec::with_capacity(GLCM_DISTANCES.len() * GLCM_ANGLES.len() * 4);
    for distance in GLCM_DISTANCES {
        for angle in GLCM_ANGLES {
            let radians = (angle as f64).to_radians();
            let dx = (distance as f64 * radians.cos()).round() as isize;
            let dy = (distance as f64 * radians.sin()).round() as isize;
            let glcm = co_occurrence(&quantised, width, height, levels.max(2), dx, dy);
            out.extend(haralick(&glcm, levels.max(2)));
        }
    }
    out
}

/// Normalised grey-level co-occurrence matrix, row-major `levels x levels`.
fn co_occurrence(
    pixels: &[usize],
    width: usize,
    height: usize,
    levels: usize,
    dx: isize,
    dy: isize,
) -> Vec<f64> {
    let mut glcm = vec![0f64; levels * levels];
    let mut total = 0f64;
    for row in 0..height {
        for col in 0..width {
            let (nr, nc) = (row as isize + dy, col as isize + dx);
            if nr < 0 || nc < 0 || nr >= height as isize || nc >= width as isize {
                continue;
            }
            let a = pixels[row * width + col];
            let b = pixels[nr as usize * width + nc as usize];
            glcm[a * levels + b] += 1.0;
            total += 1.0;
        }
    }
    if total > 0.0 {
        for cell in &mut glcm {
            *cell /= total;
        }
    }
    glcm
}

fn haralick(glcm: &[f64], levels: usize) -> [f32; 4] {
    let at = |i: usize, j: usize| glcm[i * levels + j];
    let (mut mean_i, mut mean_j) = (0.0, 0.0);
    for i in 0..levels {
        for j in 0..levels {
            mean_i += i as f64 * at(i, j);
            mean_j += j as f64 * at(i, j);
        }
    }
    let (mut var_i, mut var_j) = (0.0, 0.0);
    for i in 0..levels {
        for j in 0..levels {
            var_i += (i as f64 - mean_i).powi(2) * at(i, j);
            var_j += (j as f64 - mean_j).powi(2) * at(i, j);
        }
    }
    let (std_i, std_j) = (var_i.sqrt(), var_j.sqrt());

    let (mut contrast, mut correlation, mut energy, mut homogeneity) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..levels {
        for j in 0..levels {
            let p = at(i, j);
            let diff = i as f64 - j as f64;
            contrast += p * diff * diff;
            if std_i > 0.0 && std_j > 0.0 {
                correlation += p * (i as f64 - mean_i) * (j as f64 - mean_j) / (std_i * std_j);
            }
            energy += p * p;
            homogeneity += p / (1.0 + diff.abs());
        }
    }
    [contrast as f32, correlation as f32, energy as f32, homogeneity as f32]
}
