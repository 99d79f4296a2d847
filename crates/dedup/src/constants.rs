//! Values shared with the mobile app and the Python CLI. Changing any of
//! them breaks compatibility with files written by the other tools.

use serde::{Deserialize, Serialize};

/// Application name; also the output directory name
pub const APP_DIRECTORY: &str = "CompressPhotoFast";

/// Prefix of the marker string stored in the item's metadata
pub const EXIF_COMPRESSION_MARKER: &str = "CompressPhotoFast_Compressed";

/// Suffix appended to output file names when originals are kept
pub const COMPRESSED_FILE_SUFFIX: &str = "_compressed";

/// Files below this size are never compressed
pub const MIN_PROCESSABLE_FILE_SIZE: u64 = 100 * 1024;

/// Files below this size are reported as already small
pub const OPTIMUM_FILE_SIZE: u64 = 100 * 1024;

/// Minimum saving, in percent of the original size
pub const MIN_COMPRESSION_SAVING_PERCENT: f64 = 30.0;

/// Minimum saving in bytes
pub const MIN_BYTES_SAVING: u64 = 10 * 1024;

/// Modification-time drift tolerated after writing a marker
pub const TIME_DIFFERENCE_ALLOWED_SECONDS: i64 = 20;

/// Attempts at finding a free `_compressed_<n>` name
pub const MAX_UNIQUE_NAME_ATTEMPTS: u32 = 100;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "webp"];

pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/heic",
    "image/heif",
    "image/webp",
];

/// Quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionQuality {
    Low,
    Medium,
    High,
}

impl CompressionQuality {
    pub fn value(self) -> i32 {
        match self {
            CompressionQuality::Low => 60,
            CompressionQuality::Medium => 70,
            CompressionQuality::High => 85,
        }
    }
}

impl Default for CompressionQuality {
    fn default() -> Self {
        CompressionQuality::Medium
    }
}

/// A compression is worth keeping only if it saves at least 30% AND 10 KB
pub fn is_compression_efficient(original_size: u64, compressed_size: u64) -> bool {
    if original_size == 0 || compressed_size >= original_size {
        return false;
    }
    let saved = original_size - compressed_size;
    let saved_percent = saved as f64 / original_size as f64 * 100.0;
    saved_percent >= MIN_COMPRESSION_SAVING_PERCENT && saved >= MIN_BYTES_SAVING
}
