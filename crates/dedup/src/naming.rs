//! File-name rules for compressed outputs and for names this system
//! produces as side effects.

use crate::constants::COMPRESSED_FILE_SUFFIX;

/// Suffix given to an original that had to be moved aside during replace mode
pub const RENAMED_ORIGINAL_SUFFIX: &str = "_original";

/// Extensions that may appear in front of the real one, as in `IMG.HEIC.jpg`
const INNER_IMAGE_EXTENSIONS: &[&str] = &["heic", "heif", "jpg", "jpeg", "png", "webp"];

/// Split `name` into stem and extension (with its dot). A leading dot does not
/// start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Base name with the extension and one stacked image extension removed:
/// `image.HEIC.jpg` -> `image`, `my.photo.jpg` -> `my.photo`.
pub fn clean_double_extensions(name: &str) -> String {
    if name.starts_with('.') && name[1..].find('.').is_none() {
        // ".jpg" is all extension
        return String::new();
    }

    let (stem, ext) = split_extension(name);
    if ext.is_empty() {
        return stem.to_string();
    }

    let (inner_stem, inner_ext) = split_extension(stem);
    let inner = inner_ext.trim_start_matches('.').to_ascii_lowercase();
    if !inner_ext.is_empty() && INNER_IMAGE_EXTENSIONS.contains(&inner.as_str()) {
        inner_stem.to_string()
    } else {
        stem.to_string()
    }
}

/// Output name for a compressed copy; replace mode keeps the original name
pub fn compressed_file_name(original: &str, replace_mode: bool) -> String {
    if replace_mode {
        return original.to_string();
    }
    let (stem, ext) = split_extension(original);
    format!("{}{}{}", stem, COMPRESSED_FILE_SUFFIX, ext)
}

/// `photo_compressed_<n>.jpg`, used when the plain name is taken
pub fn numbered_compressed_file_name(original: &str, counter: u32) -> String {
    let (stem, ext) = split_extension(original);
    format!("{}{}_{}{}", stem, COMPRESSED_FILE_SUFFIX, counter, ext)
}

/// True for names the media index gives to same-named copies: `photo (1).jpg`,
/// `photo~2.jpg`.
pub fn has_duplicate_suffix(name: &str) -> bool {
    let (stem, _) = split_extension(name);
    strip_duplicate_suffix(stem).len() != stem.len()
}

fn strip_duplicate_suffix(stem: &str) -> &str {
    if let Some(inner) = stem.strip_suffix(')') {
        if let Some(open) = inner.rfind(" (") {
            let digits = &inner[open + 2..];
            if is_digits(digits) {
                return &stem[..open];
            }
        }
    }
    if let Some(tilde) = stem.rfind('~') {
        if tilde > 0 && is_digits(&stem[tilde + 1..]) {
            return &stem[..tilde];
        }
    }
    stem
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Names of originals this system renamed, e.g. `IMG_1_original.jpg`
pub fn is_renamed_original(name: &str) -> bool {
    let (stem, _) = split_extension(name);
    strip_duplicate_suffix(stem).ends_with(RENAMED_ORIGINAL_SUFFIX)
}

/// True if `candidate` is one of this system's compressed outputs of
/// `original`: the same name (outputs kept in the app directory), or
/// `<base>_compressed[_<n>]` with a compatible extension.
pub fn is_compressed_counterpart(original: &str, candidate: &str) -> bool {
    if original == candidate {
        return true;
    }

    let (_, orig_ext) = split_extension(original);
    let (cand_stem, cand_ext) = split_extension(candidate);
    if !extensions_compatible(orig_ext, cand_ext) {
        return false;
    }

    let base = clean_double_extensions(original);
    let cand_stem = strip_duplicate_suffix(clean_stacked(cand_stem));
    let Some(rest) = cand_stem
        .strip_prefix(base.as_str())
        .and_then(|r| r.strip_prefix(COMPRESSED_FILE_SUFFIX))
    else {
        return false;
    };

    rest.is_empty() || rest.strip_prefix('_').is_some_and(is_digits)
}

/// `IMG_compressed.HEIC` stem of `IMG_compressed.HEIC.jpg` loses its inner extension
fn clean_stacked(stem: &str) -> &str {
    let (inner_stem, inner_ext) = split_extension(stem);
    let inner = inner_ext.trim_start_matches('.').to_ascii_lowercase();
    if !inner_ext.is_empty() && INNER_IMAGE_EXTENSIONS.contains(&inner.as_str()) {
        inner_stem
    } else {
        stem
    }
}

/// HEIC/HEIF sources are written out as JPEG
fn extensions_compatible(original: &str, candidate: &str) -> bool {
    let o = original.trim_start_matches('.').to_ascii_lowercase();
    let c = candidate.trim_start_matches('.').to_ascii_lowercase();
    let jpeg = |e: &str| e == "jpg" || e == "jpeg";
    o == c || (jpeg(&o) && jpeg(&c)) || ((o == "heic" || o == "heif") && jpeg(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_single_extension() {
        assert_eq!(clean_double_extensions("photo.jpg"), "photo");
        assert_eq!(clean_double_extensions("image.png"), "image");
        assert_eq!(clean_double_extensions("photo.HEIC"), "photo");
    }

    #[test]
    fn test_clean_double_extension() {
        assert_eq!(clean_double_extensions("image.HEIC.jpg"), "image");
        assert_eq!(clean_double_extensions("photo.heif.jpeg"), "photo");
        assert_eq!(clean_double_extensions("picture.HEIF.png"), "picture");
        assert_eq!(clean_double_extensions("IMAGE.HEIC.JPG"), "IMAGE");
        assert_eq!(clean_double_extensions("Photo.Heic.Jpg"), "Photo");
        assert_eq!(clean_double_extensions("IMG_20240130_123456.HEIC.jpg"), "IMG_20240130_123456");
        assert_eq!(clean_double_extensions("my.photo.2024.HEIC.jpg"), "my.photo.2024");
    }

    #[test]
    fn test_clean_keeps_non_image_dots() {
        assert_eq!(clean_double_extensions("my.photo.jpg"), "my.photo");
        assert_eq!(clean_double_extensions("image.backup.old.jpg"), "image.backup.old");
    }

    #[test]
    fn test_clean_edge_cases() {
        assert_eq!(clean_double_extensions("filename"), "filename");
        assert_eq!(clean_double_extensions(".hidden.jpg"), ".hidden");
        assert_eq!(clean_double_extensions(".jpg"), "");
        assert_eq!(clean_double_extensions(""), "");
    }

    #[test]
    fn test_compressed_names() {
        assert_eq!(compressed_file_name("IMG_1.jpg", false), "IMG_1_compressed.jpg");
        assert_eq!(compressed_file_name("IMG_1.jpg", true), "IMG_1.jpg");
        assert_eq!(numbered_compressed_file_name("IMG_1.jpg", 3), "IMG_1_compressed_3.jpg");
        assert_eq!(compressed_file_name("noext", false), "noext_compressed");
    }

    #[test]
    fn test_duplicate_suffix() {
        assert!(has_duplicate_suffix("photo (1).jpg"));
        assert!(has_duplicate_suffix("photo~2.jpg"));
        assert!(!has_duplicate_suffix("photo.jpg"));
        assert!(!has_duplicate_suffix("photo (a).jpg"));
        assert!(!has_duplicate_suffix("photo ().jpg"));
        assert!(!has_duplicate_suffix("~1.jpg"));
    }

    #[test]
    fn test_renamed_original() {
        assert!(is_renamed_original("IMG_1_original.jpg"));
        assert!(is_renamed_original("IMG_1_original (2).jpg"));
        assert!(!is_renamed_original("IMG_1.jpg"));
        assert!(!is_renamed_original("original_IMG_1.jpg"));
    }

    #[test]
    fn test_counterpart_matching() {
        assert!(is_compressed_counterpart("IMG_1.jpg", "IMG_1.jpg"));
        assert!(is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed.jpg"));
        assert!(is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed_4.jpg"));
        assert!(is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed.JPEG"));
        assert!(is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed (1).jpg"));
        assert!(is_compressed_counterpart("IMG_1.HEIC", "IMG_1_compressed.jpg"));
        assert!(is_compressed_counterpart("IMG_1.HEIC", "IMG_1_compressed.HEIC.jpg"));
    }

    #[test]
    fn test_counterpart_rejects_other_files() {
        assert!(!is_compressed_counterpart("IMG_1.jpg", "IMG_10_compressed.jpg"));
        assert!(!is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed.png"));
        assert!(!is_compressed_counterpart("IMG_1.jpg", "IMG_1_compressed_x.jpg"));
        assert!(!is_compressed_counterpart("IMG_1.jpg", "IMG_1.png"));
        assert!(!is_compressed_counterpart("IMG_1.png", "IMG_1_compressed.jpg"));
    }
}
