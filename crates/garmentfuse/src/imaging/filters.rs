//! Filters over whole images. Each wraps an `image`/`imageproc` primitive
//! and guards the inputs those primitives panic on.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};

use super::{decode, encode_png, ImagingError};
use crate::blob::Effect;

/// Lower bound for both Canny thresholds.
const MIN_THRESHOLD: f32 = 1.0;

/// Side length of the thumbnail tone statistics are computed on.
const STATS_SIZE: u32 = 100;

/// Canny edge map. `strength` in 0..=100; higher finds more edges.
pub fn edge_detect(image: &DynamicImage, strength: u8) -> GrayImage {
    let strength = f32::from(strength.min(100));
    let high = (200.0 - 1.6 * strength).max(MIN_THRESHOLD);
    let low = (high / 2.5).max(MIN_THRESHOLD).min(high);
    let grey = feather(&image.to_luma8(), 1.4);
    imageproc::edges::canny(&grey, low, high)
}

/// Gaussian blur of a single-channel mask. Non-positive sigma returns the
/// mask unchanged.
pub fn feather(mask: &GrayImage, sigma: f32) -> GrayImage {
    if !(sigma.is_finite() && sigma > 0.0) {
        return mask.clone();
    }
    imageproc::filter::gaussian_blur_f32(mask, sigma)
}

/// 3x3 median filter.
pub fn denoise(image: &RgbaImage) -> RgbaImage {
    imageproc::filter::median_filter(image, 1, 1)
}

/// Lanczos3 resize by `factor` followed by an unsharp mask.
pub fn upscale(image: &DynamicImage, factor: u32) -> Result<DynamicImage, ImagingError> {
    let factor = factor.max(1);
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = match (width.checked_mul(factor), height.checked_mul(factor)) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(ImagingError::InvalidDimensions { width, height }),
    };
    if factor == 1 {
        return Ok(image.clone());
    }
    Ok(image
        .resize_exact(new_width, new_height, FilterType::Lanczos3)
        .unsharpen(1.0, 2))
}

/// Multiplies brightness and scales saturation around each pixel's luma.
/// Alpha is preserved.
pub fn modulate(image: &RgbaImage, brightness: f32, saturation: f32) -> RgbaImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let scaled = [r, g, b].map(|c| f32::from(c) * brightness);
        let luma = 0.2126 * scaled[0] + 0.7152 * scaled[1] + 0.0722 * scaled[2];
        let adjusted = scaled.map(|c| to_u8(luma + (c - luma) * saturation));
        *pixel = Rgba([adjusted[0], adjusted[1], adjusted[2], a]);
    }
    out
}

/// Mean luma and mean HSL saturation (both 0..1) of a 100x100 thumbnail.
pub fn tone_stats(image: &DynamicImage) -> (f32, f32) {
    let thumb = image
        .resize_exact(STATS_SIZE, STATS_SIZE, FilterType::Triangle)
        .to_rgb8();
    let count = (thumb.width() * thumb.height()).max(1) as f32;

    let (mut luma_sum, mut sat_sum) = (0.0f32, 0.0f32);
    for pixel in thumb.pixels() {
        let [r, g, b] = pixel.0.map(|c| f32::from(c) / 255.0);
        luma_sum += 0.2126 * r + 0.7152 * g + 0.0722 * b;
        sat_sum += super::palette::rgb_to_hsl(pixel.0).1;
    }
    (luma_sum / count, sat_sum / count)
}

pub fn to_greyscale(image: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageLuma8(image.to_luma8())
}

/// Decodes `bytes`, applies `effects` in order and encodes the result as PNG.
pub fn apply_effects(bytes: &[u8], effects: &[Effect]) -> Result<Vec<u8>, ImagingError> {
    let mut image = decode(bytes)?;
    for effect in effects {
        image = match effect {
            Effect::EdgeDetect(strength) => DynamicImage::ImageLuma8(edge_detect(&image, *strength)),
            Effect::Greyscale => to_greyscale(&image),
        };
    }
    encode_png(&image)
}

/// Greyscale mask resized to `width` x `height`.
pub fn mask_alpha(mask: &DynamicImage, width: u32, height: u32) -> GrayImage {
    let grey = mask.to_luma8();
    if grey.dimensions() == (width, height) {
        grey
    } else {
        image::imageops::resize(&grey, width, height, FilterType::Triangle)
    }
}

pub(crate) fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
