use std::path::PathBuf;
use anyhow::Result;
use walkdir::WalkDir;
use crate::classify::is_supported_extension;
use crate::config::DedupConfig;
use crate::store::ItemId;
use log::{debug, info, warn};

/// Result of scanning a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// File should be evaluated (id, size in bytes)
    Candidate(ItemId, u64),
    /// File was dropped by the scanner (path, reason)
    Skipped(PathBuf, String),
}

/// Walk the library roots and list photos worth handing to the decision
/// engine. The app output directory is not descended into.
pub fn scan_library(cfg: &DedupConfig) -> Result<Vec<ScanResult>> {
    let mut results = Vec::new();
    let mut files_checked = 0usize;

    for root in &cfg.library_roots {
        if !root.exists() {
            warn!("Library root does not exist: {}", root.display());
            continue;
        }

        info!("Scanning directory: {}", root.display());

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.depth() > 0
                    && e.file_name() == cfg.app_dir_name.as_str())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            files_checked += 1;
            if files_checked % 1000 == 0 {
                debug!("Checked {} files so far...", files_checked);
            }

            if !is_supported_extension(path) {
                continue;
            }

            // ids are UTF-8 strings
            if path.to_str().is_none() {
                warn!("Skipping file with a non-UTF-8 name: {}", path.display());
                results.push(ScanResult::Skipped(
                    path.to_path_buf(),
                    "file name is not valid UTF-8".to_string(),
                ));
                continue;
            }

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("Failed to stat {}: {}", path.display(), e);
                    continue;
                }
            };

            if size < cfg.min_processable_bytes {
                results.push(ScanResult::Skipped(
                    path.to_path_buf(),
                    format!("file < {} bytes", cfg.min_processable_bytes),
                ));
                continue;
            }

            results.push(ScanResult::Candidate(ItemId::from_path(path), size));
        }
    }

    let candidates = results
        .iter()
        .filter(|r| matches!(r, ScanResult::Candidate(..)))
        .count();
    info!(
        "Scan complete: checked {} files, {} candidates, {} skipped",
        files_checked,
        candidates,
        results.len() - candidates
    );
    Ok(results)
}
