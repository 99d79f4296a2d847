//! Compression markers embedded in the image's EXIF `UserComment`, where the
//! mobile app and the desktop CLI keep them too.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::fs_store::{FileLock, SidecarMetadataStore};
use crate::marker::{decode_user_comment, format_marker, CompressionMarker};
use crate::store::{ItemId, MetadataStore};

/// Formats whose EXIF block can be rewritten in place
const EXIF_WRITABLE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const MARKER_LOCK_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Where markers are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStorage {
    /// EXIF `UserComment` only
    #[default]
    Exif,
    /// EXIF, with a `.cpfmark` sidecar for formats EXIF cannot be written to
    ExifWithSidecar,
    /// `.cpfmark` sidecar files only
    Sidecar,
}

/// Metadata store for the configured marker storage
pub fn open_metadata_store(storage: MarkerStorage) -> Arc<dyn MetadataStore> {
    match storage {
        MarkerStorage::Exif => Arc::new(ExifMetadataStore::new()),
        MarkerStorage::ExifWithSidecar => Arc::new(ExifMetadataStore::with_sidecar_fallback()),
        MarkerStorage::Sidecar => Arc::new(SidecarMetadataStore::new()),
    }
}

/// Raw `UserComment` bytes of the primary image, if there are any
pub fn read_user_comment(path: &Path) -> Result<Option<Vec<u8>>, exif::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let comment = exif
        .get_field(exif::Tag::UserComment, exif::In::PRIMARY)
        .and_then(|field| match &field.value {
            exif::Value::Undefined(bytes, _) => Some(bytes.clone()),
            exif::Value::Ascii(parts) => parts.first().cloned(),
            _ => None,
        });
    Ok(comment)
}

/// True unless the file is known to carry no EXIF block
fn has_exif(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return true;
    };
    !matches!(
        exif::Reader::new().read_from_container(&mut BufReader::new(file)),
        Err(exif::Error::NotFound(_))
    )
}

fn is_exif_writable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXIF_WRITABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default)]
pub struct ExifMetadataStore {
    fallback: Option<SidecarMetadataStore>,
}

impl ExifMetadataStore {
    pub fn new() -> Self {
        Self { fallback: None }
    }

    pub fn with_sidecar_fallback() -> Self {
        Self {
            fallback: Some(SidecarMetadataStore::new()),
        }
    }

    fn read_exif(&self, id: &ItemId, path: &Path) -> StoreResult<Option<CompressionMarker>> {
        match read_user_comment(path) {
            Ok(Some(raw)) => Ok(decode_user_comment(&raw)),
            Ok(None) => Ok(None),
            Err(exif::Error::Io(e)) => Err(StoreError::io(id, e)),
            Err(exif::Error::InvalidFormat(reason)) | Err(exif::Error::NotSupported(reason)) => {
                debug!("No readable EXIF in {}: {}", path.display(), reason);
                Ok(None)
            }
            Err(e) => Err(StoreError::Other(format!("EXIF read failed for {}: {}", id, e))),
        }
    }

    /// Replace the `UserComment` tag, keeping every other tag. The raw UTF-8
    /// marker is written without a charset header, as the other tools do.
    fn write_exif(&self, id: &ItemId, path: &Path, marker: &str) -> StoreResult<()> {
        if !is_exif_writable(path) {
            return Err(StoreError::Unsupported {
                id: id.clone(),
                operation: "write EXIF marker",
            });
        }

        let _lock =
            FileLock::acquire(path, MARKER_LOCK_TIMEOUT).map_err(|e| StoreError::io(id, e))?;

        let mut metadata = match Metadata::new_from_path(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                // existing EXIF is never discarded
                if has_exif(path) {
                    return Err(StoreError::Other(format!(
                        "refusing to rewrite unparsable EXIF in {}: {}",
                        id, e
                    )));
                }
                debug!("Starting a fresh EXIF block for {}: {}", path.display(), e);
                Metadata::new()
            }
        };

        metadata.set_tag(ExifTag::UserComment(marker.as_bytes().to_vec()));
        metadata.write_to_file(path).map_err(|e| StoreError::io(id, e))
    }
}

impl MetadataStore for ExifMetadataStore {
    fn read_marker(&self, id: &ItemId) -> StoreResult<Option<CompressionMarker>> {
        let path = id.to_path_buf();
        if !path.is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }

        if let Some(marker) = self.read_exif(id, &path)? {
            return Ok(Some(marker));
        }
        match &self.fallback {
            Some(sidecar) => sidecar.read_marker(id),
            None => Ok(None),
        }
    }

    fn write_marker(&self, id: &ItemId, quality: i32, timestamp_ms: i64) -> StoreResult<()> {
        let path = id.to_path_buf();
        if !path.is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }

        let marker = format_marker(quality, timestamp_ms);
        match (self.write_exif(id, &path, &marker), &self.fallback) {
            (Ok(()), _) => Ok(()),
            (Err(StoreError::NotFound(missing)), _) => Err(StoreError::NotFound(missing)),
            (Err(e), Some(sidecar)) => {
                warn!("EXIF marker write failed for {}, using sidecar: {}", id, e);
                sidecar.write_marker(id, quality, timestamp_ms)
            }
            (Err(e), None) => Err(e),
        }
    }
}
