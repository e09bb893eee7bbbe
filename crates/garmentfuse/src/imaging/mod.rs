//! Pixel-level building blocks used by the stages: decoding, compositing,
//! filters and palette extraction.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

pub mod composite;
pub mod filters;
pub mod palette;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Empty image input")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid colour '{0}'")]
    InvalidColor(String),
}

impl crate::pipeline::fallback::FailureKind for ImagingError {
    fn kind(&self) -> &'static str {
        match self {
            ImagingError::EmptyInput => "empty image",
            ImagingError::Decode(_) | ImagingError::InvalidDimensions { .. } => "undecodable image",
            ImagingError::Encode(_) => "encode failed",
            ImagingError::InvalidColor(_) => "invalid colour",
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    if bytes.is_empty() {
        return Err(ImagingError::EmptyInput);
    }
    let image = image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(image)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Parses `#rrggbb` (the leading `#` is optional).
pub fn parse_hex_color(value: &str) -> Result<[u8; 3], ImagingError> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ImagingError::InvalidColor(value.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| ImagingError::InvalidColor(value.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}
