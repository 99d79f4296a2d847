use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::marker::CompressionMarker;

/// Opaque handle to a media item (a path or a content URI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(canonical: impl Into<String>) -> Self {
        ItemId(canonical.into())
    }

    /// Identifier for a filesystem path. Lossy for non-UTF-8 names, which the
    /// scanner skips.
    pub fn from_path(path: &Path) -> Self {
        ItemId(path.to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId::new(s)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

/// Read access to the media index
pub trait ItemStore: Send + Sync {
    fn exists(&self, id: &ItemId) -> bool;
    fn mime_type(&self, id: &ItemId) -> StoreResult<String>;
    fn size(&self, id: &ItemId) -> StoreResult<u64>;
    fn last_modified(&self, id: &ItemId) -> StoreResult<DateTime<Utc>>;
    fn display_name(&self, id: &ItemId) -> StoreResult<String>;
    /// True while the item is still being written by its producer
    fn is_pending_write(&self, id: &ItemId) -> StoreResult<bool>;
    fn path(&self, id: &ItemId) -> StoreResult<String>;
    /// Already-produced compressed outputs of `id` inside the app directory
    fn compressed_versions(&self, id: &ItemId, app_dir_name: &str) -> StoreResult<Vec<ItemId>>;
}

/// Per-item storage of the compression marker
pub trait MetadataStore: Send + Sync {
    /// `Ok(None)` when the item carries no marker
    fn read_marker(&self, id: &ItemId) -> StoreResult<Option<CompressionMarker>>;
    /// Overwrites any previous marker
    fn write_marker(&self, id: &ItemId, quality: i32, timestamp_ms: i64) -> StoreResult<()>;
}

/// User settings consulted by the decision engine
pub trait Settings: Send + Sync {
    fn auto_processing_enabled(&self) -> bool;
    fn process_screenshots(&self) -> bool;
    fn process_messenger_photos(&self) -> bool;
    fn replace_in_place(&self) -> bool;
}
