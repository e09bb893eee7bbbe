//! Fabric compositing and blending.

use std::ops::Range;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};

use super::filters::{mask_alpha, modulate, to_u8, tone_stats};

/// Upper share of the frame treated as the top garment.
pub const TOP_BAND_END: f32 = 0.4;

const HARMONIZE_MIN: f32 = 0.85;
const HARMONIZE_MAX: f32 = 1.15;

/// Blend parameters derived from the job's fusion strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeParams {
    /// Multiply-layer opacity in percent.
    pub opacity: u8,
    pub brightness: f32,
    pub saturation: f32,
}

impl CompositeParams {
    pub fn from_strength(strength: f32) -> Self {
        let s = if strength.is_finite() {
            strength.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            opacity: (s * 100.0).round() as u8,
            brightness: 1.0 + 0.1 * s,
            saturation: 1.0 + 0.2 * s,
        }
    }

    pub fn opacity_fraction(&self) -> f32 {
        f32::from(self.opacity) / 100.0
    }
}

/// A horizontal slice of the frame, as fractions of its height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub start: f32,
    pub end: f32,
}

impl Band {
    pub const FULL: Band = Band { start: 0.0, end: 1.0 };
    pub const TOP: Band = Band {
        start: 0.0,
        end: TOP_BAND_END,
    };
    pub const BOTTOM: Band = Band {
        start: TOP_BAND_END,
        end: 1.0,
    };

    pub fn rows(&self, height: u32) -> Range<u32> {
        let at = |f: f32| ((f.clamp(0.0, 1.0) * height as f32).round() as u32).min(height);
        let (start, end) = (at(self.start), at(self.end));
        start..end.max(start)
    }
}

/// Resizes `fabric` to fill `width` x `height`, cropping the overflow.
pub fn cover(fabric: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    fabric
        .resize_to_fill(width.max(1), height.max(1), FilterType::Lanczos3)
        .to_rgba8()
}

/// Multiply-blends `fabric` into `band` of `base` at `opacity` (0..1).
pub fn multiply_band(base: &mut RgbaImage, fabric: &DynamicImage, band: Band, opacity: f32) {
    let rows = band.rows(base.height());
    if rows.is_empty() {
        return;
    }
    let layer = cover(fabric, base.width(), rows.end - rows.start);
    let opacity = opacity.clamp(0.0, 1.0);

    for (x, ly, fabric_px) in layer.enumerate_pixels() {
        let px = base.get_pixel_mut(x, rows.start + ly);
        for c in 0..3 {
            let b = f32::from(px.0[c]);
            let multiplied = b * f32::from(fabric_px.0[c]) / 255.0;
            px.0[c] = to_u8(b + (multiplied - b) * opacity);
        }
    }
}

/// Fabric composite: multiply layers then a global brightness/saturation
/// lift.
pub fn fabric_composite(
    base: &DynamicImage,
    layers: &[(Band, &DynamicImage)],
    params: CompositeParams,
) -> RgbaImage {
    let mut out = base.to_rgba8();
    for (band, fabric) in layers {
        multiply_band(&mut out, fabric, *band, params.opacity_fraction());
    }
    modulate(&out, params.brightness, params.saturation)
}

/// Paints `color` over `band` at `alpha` (0..1).
pub fn color_overlay(base: &mut RgbaImage, color: [u8; 3], band: Band, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for y in band.rows(base.height()) {
        for x in 0..base.width() {
            let px = base.get_pixel_mut(x, y);
            for c in 0..3 {
                let b = f32::from(px.0[c]);
                px.0[c] = to_u8(b + (f32::from(color[c]) - b) * alpha);
            }
        }
    }
}

fn fit_to(overlay: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if overlay.dimensions() == (width, height) {
        overlay.clone()
    } else {
        image::imageops::resize(overlay, width, height, FilterType::Lanczos3)
    }
}

fn mix(base: &Rgba<u8>, overlay: &Rgba<u8>, alpha: f32) -> Rgba<u8> {
    let mut out = *base;
    for c in 0..3 {
        let b = f32::from(base.0[c]);
        out.0[c] = to_u8(b + (f32::from(overlay.0[c]) - b) * alpha);
    }
    out
}

/// Per-pixel blend with `alpha` as the overlay weight. The overlay and
/// alpha are resized to the base when their dimensions differ.
pub fn masked_blend(base: &RgbaImage, overlay: &RgbaImage, alpha: &GrayImage) -> RgbaImage {
    let (width, height) = base.dimensions();
    let overlay = fit_to(overlay, width, height);
    let alpha = mask_alpha(&DynamicImage::ImageLuma8(alpha.clone()), width, height);

    RgbaImage::from_fn(width, height, |x, y| {
        let a = f32::from(alpha.get_pixel(x, y).0[0]) / 255.0;
        mix(base.get_pixel(x, y), overlay.get_pixel(x, y), a)
    })
}

/// Uniform blend of `overlay` over `base` at `opacity` (0..1).
pub fn flat_blend(base: &RgbaImage, overlay: &RgbaImage, opacity: f32) -> RgbaImage {
    let (width, height) = base.dimensions();
    let overlay = fit_to(overlay, width, height);
    let opacity = opacity.clamp(0.0, 1.0);
    RgbaImage::from_fn(width, height, |x, y| {
        mix(base.get_pixel(x, y), overlay.get_pixel(x, y), opacity)
    })
}

fn nudge_ratio(target: f32, current: f32, nudge: f32) -> f32 {
    if current <= f32::EPSILON {
        return 1.0;
    }
    (1.0 + nudge * (target / current - 1.0)).clamp(HARMONIZE_MIN, HARMONIZE_MAX)
}

/// Moves the composite's mean luma and saturation toward the reference's.
///
/// An approximation: global multipliers only, no local colour transfer.
pub fn harmonize(reference: &DynamicImage, composite: &RgbaImage, nudge: f32) -> RgbaImage {
    let nudge = nudge.clamp(0.0, 1.0);
    let (ref_luma, ref_sat) = tone_stats(reference);
    let (luma, sat) = tone_stats(&DynamicImage::ImageRgba8(composite.clone()));

    let brightness = nudge_ratio(ref_luma, luma, nudge);
    let saturation = nudge_ratio(ref_sat, sat, nudge);
    tracing::debug!(brightness, saturation, "Harmonising composite");
    modulate(composite, brightness, saturation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::solid_image;
    use image::Luma;

    #[test]
    fn test_params_from_strength() {
        let p = CompositeParams::from_strength(0.5);
        assert_eq!(p.opacity, 50);
        assert!((p.brightness - 1.05).abs() < 1e-6);
        assert!((p.saturation - 1.10).abs() < 1e-6);

        assert_eq!(CompositeParams::from_strength(0.0).opacity, 0);
        assert_eq!(CompositeParams::from_strength(1.0).opacity, 100);
        assert_eq!(CompositeParams::from_strength(7.0).opacity, 100);
    }

    #[test]
    fn test_band_rows() {
        assert_eq!(Band::TOP.rows(100), 0..40);
        assert_eq!(Band::BOTTOM.rows(100), 40..100);
        assert_eq!(Band::FULL.rows(7), 0..7);
        assert!(Band::TOP.rows(0).is_empty());
    }

    #[test]
    fn test_multiply_band_only_touches_band() {
        let mut base = solid_image(10, 10, [200, 200, 200]).to_rgba8();
        let fabric = solid_image(4, 4, [0, 0, 0]);
        multiply_band(&mut base, &fabric, Band::TOP, 1.0);

        assert_eq!(base.get_pixel(5, 0).0[..3], [0, 0, 0]);
        assert_eq!(base.get_pixel(5, 3).0[..3], [0, 0, 0]);
        assert_eq!(base.get_pixel(5, 4).0[..3], [200, 200, 200]);
    }

    #[test]
    fn test_fabric_composite_zero_strength_keeps_base() {
        let base = solid_image(8, 8, [90, 120, 150]);
        let fabric = solid_image(8, 8, [255, 0, 0]);
        let out = fabric_composite(
            &base,
            &[(Band::FULL, &fabric)],
            CompositeParams::from_strength(0.0),
        );
        assert_eq!(out, base.to_rgba8());
    }

    #[test]
    fn test_color_overlay_alpha() {
        let mut base = solid_image(4, 10, [0, 0, 0]).to_rgba8();
        color_overlay(&mut base, [200, 100, 0], Band::BOTTOM, 0.5);
        assert_eq!(base.get_pixel(0, 9).0[..3], [100, 50, 0]);
        assert_eq!(base.get_pixel(0, 0).0[..3], [0, 0, 0]);
    }

    #[test]
    fn test_masked_blend_follows_alpha() {
        let base = solid_image(4, 4, [0, 0, 0]).to_rgba8();
        let overlay = solid_image(4, 4, [255, 255, 255]).to_rgba8();
        let alpha = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }]));

        let out = masked_blend(&base, &overlay, &alpha);
        assert_eq!(out.get_pixel(0, 0).0[..3], [0, 0, 0]);
        assert_eq!(out.get_pixel(3, 0).0[..3], [255, 255, 255]);
    }

    #[test]
    fn test_flat_blend_resizes_overlay() {
        let base = solid_image(6, 6, [0, 0, 0]).to_rgba8();
        let overlay = solid_image(3, 3, [100, 100, 100]).to_rgba8();
        let out = flat_blend(&base, &overlay, 0.7);
        assert_eq!(out.dimensions(), (6, 6));
        assert_eq!(out.get_pixel(2, 2).0[..3], [70, 70, 70]);
    }

    #[test]
    fn test_harmonize_pulls_toward_reference_within_bounds() {
        let reference = solid_image(20, 20, [200, 200, 200]);
        let composite = solid_image(20, 20, [100, 100, 100]).to_rgba8();
        let out = harmonize(&reference, &composite, 0.5);
        // Gap ratio 2.0 is clamped to the 1.15 ceiling.
        assert_eq!(out.get_pixel(0, 0).0[0], 115);

        let same = harmonize(&reference, &reference.to_rgba8(), 0.5);
        assert_eq!(same.get_pixel(0, 0).0[0], 200);
    }
}
