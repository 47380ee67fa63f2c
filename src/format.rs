//! Format hints passed to the engine.
//!
//! The engine needs to know the container format of every asset it parses or
//! signs. Hints are derived from file extensions or given as MIME types and
//! normalized to a canonical MIME type before any native call.

use std::path::Path;

use crate::error::{Error, Result};

/// Extension to MIME type for every container the engine handles.
const FORMATS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("dng", "image/x-adobe-dng"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("avif", "image/avif"),
    ("svg", "image/svg+xml"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("m4a", "audio/mp4"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("pdf", "application/pdf"),
];

/// Derives the format hint from a path's extension.
pub fn from_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;
    normalize(ext)
}

/// Normalizes an extension (with or without the dot) or MIME type.
pub fn normalize(hint: &str) -> Result<&'static str> {
    let hint = hint.trim().trim_start_matches('.').to_ascii_lowercase();
    FORMATS
        .iter()
        .find(|(ext, mime)| *ext == hint || *mime == hint)
        .map(|(_, mime)| *mime)
        .ok_or(Error::UnsupportedFormat(hint))
}
