//! Fabric palette extraction: median-cut quantisation and classification of
//! the resulting colours into six named swatches.

use image::imageops::FilterType;
use image::DynamicImage;

use super::to_hex;

/// Longest side of the copy quantisation runs on.
const SAMPLE_SIZE: u32 = 100;
const MAX_COLORS: usize = 64;

const WEIGHT_SATURATION: f32 = 3.0;
const WEIGHT_LUMA: f32 = 6.5;
const WEIGHT_POPULATION: f32 = 0.5;

/// Side length of motif patches.
pub const PATCH_SIZE: u32 = 64;

/// Patch centres as fractions of width and height.
const PATCH_CENTRES: [(f32, f32); 4] = [(0.25, 0.25), (0.75, 0.25), (0.5, 0.5), (0.25, 0.75)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwatchKind {
    Vibrant,
    Muted,
    DarkVibrant,
    DarkMuted,
    LightVibrant,
    LightMuted,
}

struct Target {
    luma: (f32, f32, f32),
    saturation: (f32, f32, f32),
}

impl SwatchKind {
    /// Order colours are reported in.
    pub const REPORT_ORDER: [SwatchKind; 6] = [
        SwatchKind::Vibrant,
        SwatchKind::Muted,
        SwatchKind::DarkVibrant,
        SwatchKind::DarkMuted,
        SwatchKind::LightVibrant,
        SwatchKind::LightMuted,
    ];

    /// Order swatches claim colours in.
    const SELECTION_ORDER: [SwatchKind; 6] = [
        SwatchKind::Vibrant,
        SwatchKind::LightVibrant,
        SwatchKind::DarkVibrant,
        SwatchKind::Muted,
        SwatchKind::LightMuted,
        SwatchKind::DarkMuted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SwatchKind::Vibrant => "Vibrant",
            SwatchKind::Muted => "Muted",
            SwatchKind::DarkVibrant => "DarkVibrant",
            SwatchKind::DarkMuted => "DarkMuted",
            SwatchKind::LightVibrant => "LightVibrant",
            SwatchKind::LightMuted => "LightMuted",
        }
    }

    // (min, target, max)
    fn target(&self) -> Target {
        const NORMAL_LUMA: (f32, f32, f32) = (0.3, 0.5, 0.7);
        const DARK_LUMA: (f32, f32, f32) = (0.0, 0.26, 0.45);
        const LIGHT_LUMA: (f32, f32, f32) = (0.55, 0.74, 1.0);
        const VIBRANT_SAT: (f32, f32, f32) = (0.35, 1.0, 1.0);
        const MUTED_SAT: (f32, f32, f32) = (0.0, 0.3, 0.4);

        let (luma, saturation) = match self {
            SwatchKind::Vibrant => (NORMAL_LUMA, VIBRANT_SAT),
            SwatchKind::LightVibrant => (LIGHT_LUMA, VIBRANT_SAT),
            SwatchKind::DarkVibrant => (DARK_LUMA, VIBRANT_SAT),
            SwatchKind::Muted => (NORMAL_LUMA, MUTED_SAT),
            SwatchKind::LightMuted => (LIGHT_LUMA, MUTED_SAT),
            SwatchKind::DarkMuted => (DARK_LUMA, MUTED_SAT),
        };
        Target { luma, saturation }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Swatch {
    pub kind: SwatchKind,
    pub rgb: [u8; 3],
    pub population: u32,
}

impl Swatch {
    pub fn hex(&self) -> String {
        to_hex(self.rgb)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Palette {
    /// At most one swatch per kind, in [`SwatchKind::REPORT_ORDER`].
    pub swatches: Vec<Swatch>,
}

impl Palette {
    pub fn colors(&self) -> Vec<String> {
        self.swatches.iter().map(Swatch::hex).collect()
    }

    /// The Vibrant swatch, else the first colour, else black.
    pub fn dominant(&self) -> String {
        self.get(SwatchKind::Vibrant)
            .or_else(|| self.swatches.first())
            .map(Swatch::hex)
            .unwrap_or_else(|| "#000000".to_string())
    }

    pub fn get(&self, kind: SwatchKind) -> Option<&Swatch> {
        self.swatches.iter().find(|s| s.kind == kind)
    }
}

/// Hue in degrees, saturation and lightness in 0..1.
pub fn rgb_to_hsl(rgb: [u8; 3]) -> (f32, f32, f32) {
    let [r, g, b] = rgb.map(|c| f32::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let d = max - min;
    if d <= f32::EPSILON {
        return (0.0, 0.0, l);
    }

    let s = d / (1.0 - (2.0 * l - 1.0).abs());
    let h = if max == r {
        60.0 * (((g - b) / d).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    (h, s.clamp(0.0, 1.0), l)
}

struct ColorBox {
    pixels: Vec<[u8; 3]>,
}

impl ColorBox {
    fn ranges(&self) -> [u8; 3] {
        let mut lo = [u8::MAX; 3];
        let mut hi = [u8::MIN; 3];
        for p in &self.pixels {
            for c in 0..3 {
                lo[c] = lo[c].min(p[c]);
                hi[c] = hi[c].max(p[c]);
            }
        }
        [0, 1, 2].map(|c| hi[c].saturating_sub(lo[c]))
    }

    fn priority(&self) -> u64 {
        let widest = self.ranges().into_iter().max().unwrap_or(0);
        u64::from(widest) * self.pixels.len() as u64
    }

    fn split(mut self) -> (ColorBox, ColorBox) {
        let ranges = self.ranges();
        let channel = (0..3).max_by_key(|&c| ranges[c]).unwrap_or(0);
        self.pixels.sort_unstable_by_key(|p| p[channel]);
        let upper = self.pixels.split_off(self.pixels.len() / 2);
        (self, ColorBox { pixels: upper })
    }

    fn average(&self) -> [u8; 3] {
        let n = self.pixels.len().max(1) as u64;
        let mut sum = [0u64; 3];
        for p in &self.pixels {
            for c in 0..3 {
                sum[c] += u64::from(p[c]);
            }
        }
        sum.map(|s| ((s + n / 2) / n) as u8)
    }
}

/// Median-cut quantisation. Returns `(colour, population)` pairs.
///
/// Transparent and near-white pixels are ignored.
pub fn quantize(image: &DynamicImage, max_colors: usize) -> Vec<([u8; 3], u32)> {
    let sample = if image.width() > SAMPLE_SIZE || image.height() > SAMPLE_SIZE {
        image.resize(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
    } else {
        image.clone()
    };

    let pixels: Vec<[u8; 3]> = sample
        .to_rgba8()
        .pixels()
        .filter(|p| p.0[3] >= 125 && !(p.0[0] > 250 && p.0[1] > 250 && p.0[2] > 250))
        .map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    if pixels.is_empty() {
        return Vec::new();
    }

    let mut boxes = vec![ColorBox { pixels }];
    while boxes.len() < max_colors.max(1) {
        let Some((index, _)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.pixels.len() > 1 && b.priority() > 0)
            .max_by_key(|(_, b)| b.priority())
        else {
            break;
        };
        let (a, b) = boxes.swap_remove(index).split();
        boxes.push(a);
        boxes.push(b);
    }

    boxes
        .iter()
        .map(|b| (b.average(), b.pixels.len() as u32))
        .collect()
}

fn score(target: &Target, saturation: f32, luma: f32, population: u32, max_population: u32) -> f32 {
    let sat_score = 1.0 - (saturation - target.saturation.1).abs();
    let luma_score = 1.0 - (luma - target.luma.1).abs();
    let pop_score = if max_population == 0 {
        0.0
    } else {
        population as f32 / max_population as f32
    };
    (sat_score * WEIGHT_SATURATION + luma_score * WEIGHT_LUMA + pop_score * WEIGHT_POPULATION)
        / (WEIGHT_SATURATION + WEIGHT_LUMA + WEIGHT_POPULATION)
}

/// Assigns each swatch kind the best-scoring unclaimed colour inside its
/// luma and saturation range.
pub fn classify(colors: &[([u8; 3], u32)]) -> Palette {
    let max_population = colors.iter().map(|(_, n)| *n).max().unwrap_or(0);
    let hsl: Vec<(f32, f32)> = colors
        .iter()
        .map(|(rgb, _)| {
            let (_, s, l) = rgb_to_hsl(*rgb);
            (s, l)
        })
        .collect();

    let mut claimed = vec![false; colors.len()];
    let mut picked: Vec<Swatch> = Vec::new();

    for kind in SwatchKind::SELECTION_ORDER {
        let target = kind.target();
        let best = colors
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed[*i])
            .filter(|(i, _)| {
                let (s, l) = hsl[*i];
                (target.saturation.0..=target.saturation.2).contains(&s)
                    && (target.luma.0..=target.luma.2).contains(&l)
            })
            .map(|(i, (_, population))| {
                let (s, l) = hsl[i];
                (i, score(&target, s, l, *population, max_population))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((i, _)) = best {
            claimed[i] = true;
            picked.push(Swatch {
                kind,
                rgb: colors[i].0,
                population: colors[i].1,
            });
        }
    }

    let swatches = SwatchKind::REPORT_ORDER
        .iter()
        .filter_map(|kind| picked.iter().find(|s| s.kind == *kind).cloned())
        .collect();
    Palette { swatches }
}

pub fn extract(image: &DynamicImage) -> Palette {
    classify(&quantize(image, MAX_COLORS))
}

/// Crops up to four `size` x `size` patches centred on fixed points,
/// shifted to stay inside the image.
pub fn motif_patches(image: &DynamicImage, size: u32) -> Vec<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 || size == 0 {
        return Vec::new();
    }
    let (patch_w, patch_h) = (size.min(width), size.min(height));

    PATCH_CENTRES
        .iter()
        .map(|(fx, fy)| {
            let cx = (width as f32 * fx).round() as u32;
            let cy = (height as f32 * fy).round() as u32;
            let left = cx.saturating_sub(size / 2).min(width - patch_w);
            let top = cy.saturating_sub(size / 2).min(height - patch_h);
            image.crop_imm(left, top, patch_w, patch_h)
        })
        .collect()
}
