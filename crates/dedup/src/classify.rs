use std::path::Path;

use crate::constants::{SUPPORTED_EXTENSIONS, SUPPORTED_MIME_TYPES};

/// Messenger download folders
const MESSENGER_DIRS: &[&str] = &[
    "/whatsapp/",
    "/telegram/",
    "/viber/",
    "/messenger/",
    "/messages/",
];

/// Screenshot detection by file name
pub fn is_screenshot(file_name: &str) -> bool {
    let name = file_name.to_lowercase();
    name.contains("screenshot")
        || name.contains("screen_shot")
        || name.starts_with("scr_")
        || (name.contains("screen") && name.contains("shot"))
}

/// Photos saved by messaging apps, outside the Documents tree
pub fn is_messenger_photo(path: &str) -> bool {
    let path = path.replace('\\', "/").to_lowercase();
    if path.contains("/documents/") {
        return false;
    }
    MESSENGER_DIRS.iter().any(|dir| path.contains(dir)) || path.contains("pictures/messages")
}

pub fn is_supported_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    SUPPORTED_MIME_TYPES.contains(&mime.as_str())
}

pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type guessed from the extension
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// True if `path` lies inside a directory component named `app_dir_name`
pub fn is_in_app_directory(path: &str, app_dir_name: &str) -> bool {
    path.replace('\\', "/")
        .split('/')
        .rev()
        .skip(1)
        .any(|component| component == app_dir_name)
}
