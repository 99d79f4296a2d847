//! Filesystem-backed stores: item metadata from `stat`, and the optional
//! sidecar marker files kept next to each photo.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration as StdDuration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::classify::mime_from_extension;
use crate::constants::MAX_UNIQUE_NAME_ATTEMPTS;
use crate::error::{StoreError, StoreResult};
use crate::marker::{format_marker, parse_marker, CompressionMarker};
use crate::naming::{
    clean_double_extensions, compressed_file_name, is_compressed_counterpart,
    numbered_compressed_file_name, split_extension,
};
use crate::store::{ItemId, ItemStore, MetadataStore};

/// Extension appended to a photo's path for its marker sidecar
pub const MARKER_SIDECAR_EXTENSION: &str = "cpfmark";

/// Lock files older than this are left over from a crashed writer
pub const STALE_LOCK_AGE: StdDuration = StdDuration::from_secs(60);

/// Prefix of files a producer has not finished writing
pub const PENDING_FILE_PREFIX: &str = ".pending-";

/// Get the path to the marker sidecar for a given photo
pub fn marker_sidecar_path(file_path: &Path) -> PathBuf {
    append_extension(file_path, MARKER_SIDECAR_EXTENSION)
}

/// Get the path to the lock file guarding a photo
pub fn lock_file_path(file_path: &Path) -> PathBuf {
    append_extension(file_path, "lock")
}

fn append_extension(file_path: &Path, ext: &str) -> PathBuf {
    let mut os = file_path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Item store over plain files; ids are paths
#[derive(Debug, Clone, Default)]
pub struct FsItemStore {
    output_dir: Option<PathBuf>,
}

impl FsItemStore {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }

    fn metadata(&self, id: &ItemId) -> StoreResult<fs::Metadata> {
        fs::metadata(id.to_path_buf()).map_err(|e| StoreError::io(id, e))
    }

    fn search_dirs(&self, path: &Path, app_dir_name: &str) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(parent) = path.parent() {
            dirs.push(parent.join(app_dir_name));
        }
        if let Some(out) = &self.output_dir {
            if !dirs.contains(out) {
                dirs.push(out.clone());
            }
        }
        dirs
    }
}

impl ItemStore for FsItemStore {
    fn exists(&self, id: &ItemId) -> bool {
        id.to_path_buf().is_file()
    }

    fn mime_type(&self, id: &ItemId) -> StoreResult<String> {
        Ok(mime_from_extension(&id.to_path_buf()).to_string())
    }

    fn size(&self, id: &ItemId) -> StoreResult<u64> {
        Ok(self.metadata(id)?.len())
    }

    fn last_modified(&self, id: &ItemId) -> StoreResult<DateTime<Utc>> {
        let modified = self
            .metadata(id)?
            .modified()
            .map_err(|e| StoreError::io(id, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    fn display_name(&self, id: &ItemId) -> StoreResult<String> {
        Ok(file_name_of(&id.to_path_buf()))
    }

    fn is_pending_write(&self, id: &ItemId) -> StoreResult<bool> {
        let path = id.to_path_buf();
        Ok(file_name_of(&path).starts_with(PENDING_FILE_PREFIX) || lock_file_path(&path).exists())
    }

    fn path(&self, id: &ItemId) -> StoreResult<String> {
        Ok(id.as_str().to_string())
    }

    fn compressed_versions(&self, id: &ItemId, app_dir_name: &str) -> StoreResult<Vec<ItemId>> {
        let path = id.to_path_buf();
        let name = file_name_of(&path);
        let mut found = Vec::new();

        for dir in self.search_dirs(&path, app_dir_name) {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(id, e)),
            };
            for entry in entries.flatten() {
                let candidate = entry.path();
                if candidate == path || !candidate.is_file() {
                    continue;
                }
                if is_compressed_counterpart(&name, &file_name_of(&candidate)) {
                    found.push(ItemId::from_path(&candidate));
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// Where a compressed copy of `source` goes: `output_dir` if set, otherwise
/// `<parent>/<app_dir_name>`. Taken names get a numeric suffix.
pub fn unique_output_path(
    source: &Path,
    output_dir: Option<&Path>,
    app_dir_name: &str,
) -> StoreResult<PathBuf> {
    let id = ItemId::from_path(source);
    let dir = match (output_dir, source.parent()) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(parent)) => parent.join(app_dir_name),
        (None, None) => return Err(StoreError::Unsupported { id, operation: "unique_output_path" }),
    };

    let file_name = file_name_of(source);
    let (_, ext) = split_extension(&file_name);
    let name = format!("{}{}", clean_double_extensions(&file_name), ext);
    let first = dir.join(compressed_file_name(&name, false));
    if !first.exists() {
        return Ok(first);
    }
    for n in 1..=MAX_UNIQUE_NAME_ATTEMPTS {
        let candidate = dir.join(numbered_compressed_file_name(&name, n));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(StoreError::Other(format!(
        "no free output name for {} after {} attempts",
        source.display(),
        MAX_UNIQUE_NAME_ATTEMPTS
    )))
}

/// Marker store keeping `<photo>.cpfmark` sidecar files
#[derive(Debug, Clone, Default)]
pub struct SidecarMetadataStore;

impl SidecarMetadataStore {
    pub fn new() -> Self {
        SidecarMetadataStore
    }
}

impl MetadataStore for SidecarMetadataStore {
    fn read_marker(&self, id: &ItemId) -> StoreResult<Option<CompressionMarker>> {
        let path = id.to_path_buf();
        if !path.is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }

        let sidecar = marker_sidecar_path(&path);
        match fs::read_to_string(&sidecar) {
            Ok(text) => {
                let marker = parse_marker(text.trim());
                if marker.is_none() {
                    debug!("Ignoring malformed marker sidecar {}", sidecar.display());
                }
                Ok(marker)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                id: id.clone(),
                source: e,
            }),
        }
    }

    fn write_marker(&self, id: &ItemId, quality: i32, timestamp_ms: i64) -> StoreResult<()> {
        let path = id.to_path_buf();
        if !path.is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }

        let sidecar = marker_sidecar_path(&path);
        let tmp = append_extension(&sidecar, "tmp");
        fs::write(&tmp, format_marker(quality, timestamp_ms)).map_err(|e| StoreError::io(id, e))?;
        fs::rename(&tmp, &sidecar).map_err(|e| StoreError::io(id, e))?;
        Ok(())
    }
}

/// Exclusive `<file>.lock` held while a photo is rewritten in place. While it
/// exists the file store reports the photo as a pending write.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Create the lock file, waiting up to `timeout`. A lock file older than
    /// `STALE_LOCK_AGE` is removed.
    pub fn acquire(file_path: &Path, timeout: StdDuration) -> std::io::Result<Self> {
        let lock_path = lock_file_path(file_path);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(FileLock { lock_path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let age = fs::metadata(&lock_path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|m| SystemTime::now().duration_since(m).ok());
                    if age.is_some_and(|age| age > STALE_LOCK_AGE) {
                        warn!("Removing stale lock {}", lock_path.display());
                        let _ = fs::remove_file(&lock_path);
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::WouldBlock,
                            format!(
                                "could not lock {} within {:?}",
                                file_path.display(),
                                timeout
                            ),
                        ));
                    }
                    thread::sleep(StdDuration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove lock {}: {}", self.lock_path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: usize) -> ItemId {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![0u8; bytes]).unwrap();
        ItemId::from_path(&path)
    }

    #[test]
    fn test_sidecar_paths() {
        assert_eq!(
            marker_sidecar_path(Path::new("/p/IMG_1.jpg")),
            PathBuf::from("/p/IMG_1.jpg.cpfmark")
        );
        assert_eq!(lock_file_path(Path::new("/p/IMG_1.jpg")), PathBuf::from("/p/IMG_1.jpg.lock"));
    }

    #[test]
    fn test_item_metadata() {
        let dir = TempDir::new().unwrap();
        let id = touch(dir.path(), "IMG_1.JPG", 2048);
        let store = FsItemStore::default();

        assert!(store.exists(&id));
        assert_eq!(store.size(&id).unwrap(), 2048);
        assert_eq!(store.mime_type(&id).unwrap(), "image/jpeg");
        assert_eq!(store.display_name(&id).unwrap(), "IMG_1.JPG");
        assert!(store.last_modified(&id).unwrap() <= Utc::now());
        assert!(!store.is_pending_write(&id).unwrap());

        let gone = ItemId::from_path(&dir.path().join("gone.jpg"));
        assert!(!store.exists(&gone));
        assert!(matches!(store.size(&gone), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_pending_write_detection() {
        let dir = TempDir::new().unwrap();
        let store = FsItemStore::default();
        let pending = touch(dir.path(), ".pending-1700000000-IMG_2.jpg", 10);
        assert!(store.is_pending_write(&pending).unwrap());

        let id = touch(dir.path(), "IMG_3.jpg", 10);
        let lock = FileLock::acquire(&id.to_path_buf(), StdDuration::from_secs(1)).unwrap();
        assert!(store.is_pending_write(&id).unwrap());
        drop(lock);
        assert!(!store.is_pending_write(&id).unwrap());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let id = touch(dir.path(), "IMG_4.jpg", 10);
        let path = id.to_path_buf();

        let _held = FileLock::acquire(&path, StdDuration::from_secs(5)).unwrap();
        let err = FileLock::acquire(&path, StdDuration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_compressed_versions_in_app_dir_and_output_dir() {
        let dir = TempDir::new().unwrap();
        let id = touch(dir.path(), "IMG_1.jpg", 10);
        touch(dir.path(), "IMG_1_compressed.jpg", 10);
        let in_app = touch(dir.path(), "CompressPhotoFast/IMG_1_compressed.jpg", 10);
        touch(dir.path(), "CompressPhotoFast/IMG_2_compressed.jpg", 10);
        let in_out = touch(dir.path(), "out/IMG_1_compressed_2.jpg", 10);

        let store = FsItemStore::default();
        assert_eq!(
            store.compressed_versions(&id, "CompressPhotoFast").unwrap(),
            vec![in_app.clone()]
        );

        let store = FsItemStore::new(Some(dir.path().join("out")));
        let mut expected = vec![in_app, in_out];
        expected.sort();
        assert_eq!(store.compressed_versions(&id, "CompressPhotoFast").unwrap(), expected);
    }

    #[test]
    fn test_sidecar_marker_round_trip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let id = touch(dir.path(), "IMG_1.jpg", 10);
        let store = SidecarMetadataStore::new();

        assert_eq!(store.read_marker(&id).unwrap(), None);

        store.write_marker(&id, 75, 1_000).unwrap();
        assert_eq!(store.read_marker(&id).unwrap(), Some(CompressionMarker::new(75, 1_000)));
        assert_eq!(
            fs::read_to_string(marker_sidecar_path(&id.to_path_buf())).unwrap(),
            "CompressPhotoFast_Compressed:75:1000"
        );

        store.write_marker(&id, 90, 1_100).unwrap();
        assert_eq!(store.read_marker(&id).unwrap(), Some(CompressionMarker::new(90, 1_100)));
    }

    #[test]
    fn test_sidecar_for_missing_photo() {
        let dir = TempDir::new().unwrap();
        let id = ItemId::from_path(&dir.path().join("nope.jpg"));
        let store = SidecarMetadataStore::new();
        assert!(matches!(store.read_marker(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.write_marker(&id, 70, 1), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_unique_output_path() {
        let dir = TempDir::new().unwrap();
        let src = touch(dir.path(), "IMG_1.jpg.jpg", 10).to_path_buf();
        let app = dir.path().join("CompressPhotoFast");

        assert_eq!(
            unique_output_path(&src, None, "CompressPhotoFast").unwrap(),
            app.join("IMG_1_compressed.jpg")
        );

        touch(dir.path(), "CompressPhotoFast/IMG_1_compressed.jpg", 10);
        touch(dir.path(), "CompressPhotoFast/IMG_1_compressed_1.jpg", 10);
        assert_eq!(
            unique_output_path(&src, None, "CompressPhotoFast").unwrap(),
            app.join("IMG_1_compressed_2.jpg")
        );

        let out = dir.path().join("out");
        assert_eq!(
            unique_output_path(&src, Some(&out), "CompressPhotoFast").unwrap(),
            out.join("IMG_1_compressed.jpg")
        );
    }
}
