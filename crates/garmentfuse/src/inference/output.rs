//! Normalisation of the loosely-shaped values models return.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Pulls a single image reference out of a model output.
///
/// Accepts a bare string, an array whose first element is a string or an
/// object with `url`, or an object with `edge_map`, `url` or `image`.
pub fn image_ref(output: &Value) -> Option<String> {
    let found = match output {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.first().and_then(|first| match first {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("url").and_then(Value::as_str),
            _ => None,
        }),
        Value::Object(obj) => ["edge_map", "url", "image"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str)),
        _ => None,
    };

    found
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Returns true for references that must be fetched rather than decoded.
pub fn is_fetchable_url(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("file://")
}

/// Prefixes raw base64 with a PNG data-URI header. Data URIs and URLs are
/// returned unchanged.
pub fn to_data_uri(reference: &str) -> String {
    if reference.starts_with("data:") || is_fetchable_url(reference) {
        reference.to_string()
    } else {
        format!("{}{}", PNG_DATA_URI_PREFIX, reference)
    }
}

pub fn png_data_uri(bytes: &[u8]) -> String {
    format!("{}{}", PNG_DATA_URI_PREFIX, STANDARD.encode(bytes))
}

/// True for references a remote model can read as they are.
pub fn is_network_reference(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:")
}

/// Data URI for encoded image bytes, typed by their content. Unknown
/// formats are labelled PNG.
pub fn image_data_uri(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Decodes a data URI or bare base64 string. `None` for empty or invalid
/// payloads and for fetchable URLs.
pub fn decode_inline_image(reference: &str) -> Option<Vec<u8>> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || is_fetchable_url(trimmed) {
        return None;
    }

    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data)?,
        None => trimmed,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return None;
    }

    STANDARD.decode(payload.as_bytes()).ok().filter(|b| !b.is_empty())
}

/// Picks the best mask from a segmentation output's `masks` array.
///
/// Each candidate is either a string or an object with a `mask` string.
/// When candidates carry a numeric `score` the highest wins; otherwise the
/// first usable candidate is taken.
pub fn select_mask(output: &Value) -> Option<String> {
    let masks = output.get("masks")?.as_array()?;

    let candidates: Vec<(Option<f64>, &str)> = masks
        .iter()
        .filter_map(|candidate| match candidate {
            Value::String(s) => Some((None, s.as_str())),
            Value::Object(obj) => obj
                .get("mask")
                .and_then(Value::as_str)
                .map(|mask| (obj.get("score").and_then(Value::as_f64), mask)),
            _ => None,
        })
        .filter(|(_, mask)| !mask.trim().is_empty())
        .collect();

    let scored = candidates
        .iter()
        .filter_map(|(score, mask)| score.map(|s| (s, *mask)))
        .fold(None, |best: Option<(f64, &str)>, (score, mask)| match best {
            Some((best_score, _)) if best_score >= score => best,
            _ => Some((score, mask)),
        });

    scored
        .map(|(_, mask)| mask)
        .or_else(|| candidates.first().map(|(_, mask)| *mask))
        .map(str::to_string)
}
