//! In-memory stores, used when embedding the engine behind another media
//! index and throughout the tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::classify::{is_in_app_directory, mime_from_extension};
use crate::error::{StoreError, StoreResult};
use crate::marker::CompressionMarker;
use crate::naming::is_compressed_counterpart;
use crate::store::{ItemId, ItemStore, MetadataStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One media item as the index sees it
#[derive(Debug, Clone)]
pub struct MemoryItem {
    pub path: String,
    pub display_name: String,
    pub mime_type: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub pending: bool,
}

impl MemoryItem {
    pub fn new(path: &str, size: u64) -> Self {
        let p = Path::new(path);
        Self {
            path: path.to_string(),
            display_name: p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mime_type: mime_from_extension(p).to_string(),
            size,
            modified: DateTime::<Utc>::default(),
            pending: false,
        }
    }

    pub fn modified(mut self, at: DateTime<Utc>) -> Self {
        self.modified = at;
        self
    }

    pub fn mime(mut self, mime: &str) -> Self {
        self.mime_type = mime.to_string();
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }
}

/// Item store backed by a map, with per-operation fault injection
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    items: Mutex<HashMap<ItemId, MemoryItem>>,
    failures: Mutex<HashSet<(ItemId, &'static str)>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ItemId, item: MemoryItem) {
        lock(&self.items).insert(id, item);
    }

    /// Insert keyed by the item's path
    pub fn add(&self, item: MemoryItem) -> ItemId {
        let id = ItemId::new(item.path.clone());
        self.insert(id.clone(), item);
        id
    }

    pub fn remove(&self, id: &ItemId) -> Option<MemoryItem> {
        lock(&self.items).remove(id)
    }

    pub fn update<F: FnOnce(&mut MemoryItem)>(&self, id: &ItemId, f: F) {
        if let Some(item) = lock(&self.items).get_mut(id) {
            f(item);
        }
    }

    /// Make `operation` (a trait method name such as `"mime_type"`) fail for `id`
    pub fn fail_on(&self, id: &ItemId, operation: &'static str) {
        lock(&self.failures).insert((id.clone(), operation));
    }

    fn with_item<T>(
        &self,
        id: &ItemId,
        operation: &'static str,
        f: impl FnOnce(&MemoryItem) -> T,
    ) -> StoreResult<T> {
        if lock(&self.failures).contains(&(id.clone(), operation)) {
            return Err(StoreError::Other(format!(
                "injected failure in {} for {}",
                operation, id
            )));
        }
        lock(&self.items)
            .get(id)
            .map(f)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

impl ItemStore for InMemoryItemStore {
    fn exists(&self, id: &ItemId) -> bool {
        lock(&self.items).contains_key(id)
    }

    fn mime_type(&self, id: &ItemId) -> StoreResult<String> {
        self.with_item(id, "mime_type", |i| i.mime_type.clone())
    }

    fn size(&self, id: &ItemId) -> StoreResult<u64> {
        self.with_item(id, "size", |i| i.size)
    }

    fn last_modified(&self, id: &ItemId) -> StoreResult<DateTime<Utc>> {
        self.with_item(id, "last_modified", |i| i.modified)
    }

    fn display_name(&self, id: &ItemId) -> StoreResult<String> {
        self.with_item(id, "display_name", |i| i.display_name.clone())
    }

    fn is_pending_write(&self, id: &ItemId) -> StoreResult<bool> {
        self.with_item(id, "is_pending_write", |i| i.pending)
    }

    fn path(&self, id: &ItemId) -> StoreResult<String> {
        self.with_item(id, "path", |i| i.path.clone())
    }

    fn compressed_versions(&self, id: &ItemId, app_dir_name: &str) -> StoreResult<Vec<ItemId>> {
        let name = self.with_item(id, "compressed_versions", |i| i.display_name.clone())?;
        let items = lock(&self.items);
        let mut found: Vec<ItemId> = items
            .iter()
            .filter(|(other, _)| *other != id)
            .filter(|(_, item)| is_in_app_directory(&item.path, app_dir_name))
            .filter(|(_, item)| is_compressed_counterpart(&name, &item.display_name))
            .map(|(other, _)| other.clone())
            .collect();
        found.sort();
        Ok(found)
    }
}

/// Marker store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    markers: Mutex<HashMap<ItemId, String>>,
    failing: Mutex<HashSet<ItemId>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads and writes for `id` fail with an I/O error
    pub fn fail_reads_for(&self, id: &ItemId) {
        lock(&self.failing).insert(id.clone());
    }

    /// Raw marker text, as another tool would see it
    pub fn raw(&self, id: &ItemId) -> Option<String> {
        lock(&self.markers).get(id).cloned()
    }

    pub fn set_raw(&self, id: &ItemId, text: &str) {
        lock(&self.markers).insert(id.clone(), text.to_string());
    }

    fn check(&self, id: &ItemId) -> StoreResult<()> {
        if lock(&self.failing).contains(id) {
            return Err(StoreError::Io {
                id: id.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected metadata failure"),
            });
        }
        Ok(())
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn read_marker(&self, id: &ItemId) -> StoreResult<Option<CompressionMarker>> {
        self.check(id)?;
        Ok(lock(&self.markers)
            .get(id)
            .and_then(|text| crate::marker::parse_marker(text)))
    }

    fn write_marker(&self, id: &ItemId, quality: i32, timestamp_ms: i64) -> StoreResult<()> {
        self.check(id)?;
        lock(&self.markers).insert(id.clone(), crate::marker::format_marker(quality, timestamp_ms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_versions_only_in_app_directory() {
        let store = InMemoryItemStore::new();
        let original = store.add(MemoryItem::new("/sdcard/DCIM/IMG_1.jpg", 5_000_000));
        store.add(MemoryItem::new("/sdcard/DCIM/IMG_1_compressed.jpg", 1_000_000));
        let output = store.add(MemoryItem::new(
            "/sdcard/Pictures/CompressPhotoFast/IMG_1_compressed.jpg",
            1_000_000,
        ));
        store.add(MemoryItem::new("/sdcard/Pictures/CompressPhotoFast/IMG_2.jpg", 1_000_000));

        let found = store.compressed_versions(&original, "CompressPhotoFast").unwrap();
        assert_eq!(found, vec![output]);
    }

    #[test]
    fn test_injected_failures() {
        let store = InMemoryItemStore::new();
        let id = store.add(MemoryItem::new("/a/b.jpg", 10));
        store.fail_on(&id, "mime_type");

        assert!(store.mime_type(&id).is_err());
        assert_eq!(store.size(&id).unwrap(), 10);
        assert!(matches!(
            store.size(&ItemId::from("/missing.jpg")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_marker_text_is_shared_format() {
        let store = InMemoryMetadataStore::new();
        let id = ItemId::from("x");
        store.write_marker(&id, 70, 123).unwrap();
        assert_eq!(store.raw(&id).as_deref(), Some("CompressPhotoFast_Compressed:70:123"));

        store.set_raw(&id, "garbage");
        assert_eq!(store.read_marker(&id).unwrap(), None);
    }
}
