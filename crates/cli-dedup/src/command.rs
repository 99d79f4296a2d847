use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use dedup::constants::is_compression_efficient;
use dedup::fs_store::{unique_output_path, FileLock, PENDING_FILE_PREFIX};
use dedup::{
    CompressRequest, CompressionOutcome, Compressor, DedupConfig, DispatchError, ItemId, StoreError,
};
use log::{debug, warn};
use uuid::Uuid;

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Compressor that shells out to an image tool such as ImageMagick
pub struct CommandCompressor {
    template: Vec<String>,
    output_dir: Option<PathBuf>,
    app_dir_name: String,
}

impl CommandCompressor {
    pub fn from_config(cfg: &DedupConfig) -> Self {
        Self {
            template: cfg.compressor_command.clone(),
            output_dir: cfg.output_dir.clone(),
            app_dir_name: cfg.app_dir_name.clone(),
        }
    }

    fn fail(id: &ItemId, reason: impl Into<String>) -> DispatchError {
        DispatchError::Compressor {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    /// Run the tool writing into a `.pending-` file next to `target`, then
    /// move it over `target` if the saving is worth it.
    fn run_into(
        &self,
        id: &ItemId,
        source: &Path,
        target: &Path,
        quality: i32,
    ) -> Result<Option<(u64, u64)>, DispatchError> {
        let original_size = fs::metadata(source).map_err(|e| StoreError::io(id, e))?.len();

        let dir = target
            .parent()
            .ok_or_else(|| Self::fail(id, "output path has no parent directory"))?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(id, e))?;

        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!("{}{}-{}", PENDING_FILE_PREFIX, Uuid::new_v4(), target_name));

        let args = substitute(&self.template, source, &tmp, quality);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| Self::fail(id, "compressor command is empty"))?;

        debug!("Running: {} {}", program, rest.join(" "));
        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| Self::fail(id, format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let _ = fs::remove_file(&tmp);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::fail(
                id,
                format!("{} exited with {}: {}", program, output.status, stderr.trim()),
            ));
        }

        let compressed_size = match fs::metadata(&tmp) {
            Ok(m) => m.len(),
            Err(e) => return Err(Self::fail(id, format!("compressor produced no output: {}", e))),
        };

        if !is_compression_efficient(original_size, compressed_size) {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!("Failed to remove {}: {}", tmp.display(), e);
            }
            return Ok(None);
        }

        fs::rename(&tmp, target).map_err(|e| StoreError::io(id, e))?;
        Ok(Some((original_size, compressed_size)))
    }
}

impl Compressor for CommandCompressor {
    fn compress(&self, request: &CompressRequest) -> Result<CompressionOutcome, DispatchError> {
        let id = &request.source;
        let source = id.to_path_buf();

        let (target, _lock) = if request.replace_in_place {
            let lock = FileLock::acquire(&source, LOCK_TIMEOUT)
                .map_err(|e| Self::fail(id, format!("could not lock for rewrite: {}", e)))?;
            (source.clone(), Some(lock))
        } else {
            let target =
                unique_output_path(&source, self.output_dir.as_deref(), &self.app_dir_name)?;
            (target, None)
        };

        let sizes = self.run_into(id, &source, &target, request.quality)?;
        Ok(match sizes {
            Some((original_size, compressed_size)) => CompressionOutcome::Compressed {
                output: ItemId::from_path(&target),
                original_size,
                compressed_size,
            },
            None => {
                let original_size = fs::metadata(&source).map(|m| m.len()).unwrap_or(0);
                CompressionOutcome::NotEfficient {
                    original_size,
                    compressed_size: original_size,
                }
            }
        })
    }
}

/// Replace `{input}`, `{output}` and `{quality}` in every argument
pub fn substitute(template: &[String], input: &Path, output: &Path, quality: i32) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let quality = quality.to_string();
    template
        .iter()
        .map(|arg| {
            arg.replace("{input}", &input)
                .replace("{output}", &output)
                .replace("{quality}", &quality)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compressor(dir: &Path, template: &[&str]) -> CommandCompressor {
        let mut cfg = DedupConfig::default_config();
        cfg.output_dir = Some(dir.join("out"));
        cfg.compressor_command = template.iter().map(|s| s.to_string()).collect();
        CommandCompressor::from_config(&cfg)
    }

    #[test]
    fn test_substitute() {
        let template: Vec<String> = ["magick", "{input}", "-quality", "{quality}", "{output}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            substitute(&template, Path::new("/a.jpg"), Path::new("/b.jpg"), 70),
            vec!["magick", "/a.jpg", "-quality", "70", "/b.jpg"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_compressor_writes_copy() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("IMG_1.jpg");
        fs::write(&src, vec![7u8; 200 * 1024]).unwrap();

        let c = compressor(dir.path(), &["sh", "-c", "head -c 50000 {input} > {output}"]);
        let outcome = c
            .compress(&CompressRequest {
                source: ItemId::from_path(&src),
                quality: 70,
                replace_in_place: false,
            })
            .unwrap();

        let expected = dir.path().join("out").join("IMG_1_compressed.jpg");
        assert_eq!(
            outcome,
            CompressionOutcome::Compressed {
                output: ItemId::from_path(&expected),
                original_size: 200 * 1024,
                compressed_size: 50_000,
            }
        );
        assert_eq!(fs::metadata(&src).unwrap().len(), 200 * 1024);
        // no leftover temp files
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_inefficient_output_is_discarded() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("IMG_1.jpg");
        fs::write(&src, vec![7u8; 200 * 1024]).unwrap();

        let c = compressor(dir.path(), &["cp", "{input}", "{output}"]);
        let outcome = c
            .compress(&CompressRequest {
                source: ItemId::from_path(&src),
                quality: 70,
                replace_in_place: true,
            })
            .unwrap();
        assert!(matches!(outcome, CompressionOutcome::NotEfficient { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_reports_error() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("IMG_1.jpg");
        fs::write(&src, vec![7u8; 200 * 1024]).unwrap();

        let c = compressor(dir.path(), &["sh", "-c", "echo broken >&2; exit 3"]);
        let err = c
            .compress(&CompressRequest {
                source: ItemId::from_path(&src),
                quality: 70,
                replace_in_place: true,
            })
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        // lock released
        assert!(!dedup::fs_store::lock_file_path(&src).exists());
    }
}
