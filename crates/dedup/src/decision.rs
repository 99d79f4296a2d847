//! The "does this item need compressing?" verdict.
//!
//! Filters run cheapest first and the first match wins. Evaluation is
//! read-only: it never touches the processing registry, callers gate on it
//! and manage in-flight and cooldown state around the actual work.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::classify::{is_in_app_directory, is_messenger_photo, is_screenshot, is_supported_mime};
use crate::config::DedupConfig;
use crate::error::{StoreError, StoreResult};
use crate::marker::CompressionMarker;
use crate::naming::is_renamed_original;
use crate::oracle::CompressionOracle;
use crate::store::{ItemId, ItemStore, MetadataStore, Settings};

/// Why an item does not need processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    None,
    BasicCheckFailed,
    InAppDirectory,
    CompressedVersionExists,
    AlreadyCompressed,
    AlreadySmall,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::None => "none",
            SkipReason::BasicCheckFailed => "basic check failed",
            SkipReason::InAppDirectory => "in app directory",
            SkipReason::CompressedVersionExists => "compressed version exists",
            SkipReason::AlreadyCompressed => "already compressed",
            SkipReason::AlreadySmall => "already small",
        };
        f.write_str(s)
    }
}

/// What to answer when evaluation itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report "processing required"; errors bypass deduplication
    #[default]
    FailOpen,
    /// Report "skip" with `BasicCheckFailed`
    FailClosed,
}

/// Result of one `evaluate` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingDecision {
    pub processing_required: bool,
    pub reason: SkipReason,
    pub marker: CompressionMarker,
    pub modified_at: Option<DateTime<Utc>>,
    /// Which filter fired, for logs
    pub detail: String,
}

impl ProcessingDecision {
    fn required(
        marker: CompressionMarker,
        modified_at: Option<DateTime<Utc>>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            processing_required: true,
            reason: SkipReason::None,
            marker,
            modified_at,
            detail: detail.into(),
        }
    }

    fn skip(reason: SkipReason, detail: impl Into<String>) -> Self {
        Self {
            processing_required: false,
            reason,
            marker: CompressionMarker::absent(),
            modified_at: None,
            detail: detail.into(),
        }
    }

    fn with_state(mut self, marker: CompressionMarker, modified_at: DateTime<Utc>) -> Self {
        self.marker = marker;
        self.modified_at = Some(modified_at);
        self
    }
}

/// Engine parameters that are not user settings
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub app_dir_name: String,
    /// Explicit output directory, in addition to any `app_dir_name` component
    pub output_dir: Option<String>,
    pub optimum_size: u64,
    pub failure_policy: FailurePolicy,
}

impl DecisionPolicy {
    pub fn from_config(cfg: &DedupConfig) -> Self {
        Self {
            app_dir_name: cfg.app_dir_name.clone(),
            output_dir: cfg
                .output_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            optimum_size: cfg.optimum_size_bytes,
            failure_policy: cfg.failure_policy,
        }
    }
}

pub struct DecisionEngine {
    items: Arc<dyn ItemStore>,
    oracle: CompressionOracle,
    settings: Arc<dyn Settings>,
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(
        items: Arc<dyn ItemStore>,
        oracle: CompressionOracle,
        settings: Arc<dyn Settings>,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            items,
            oracle,
            settings,
            policy,
        }
    }

    /// Engine whose settings and policy come from `cfg`
    pub fn from_config(
        cfg: &DedupConfig,
        items: Arc<dyn ItemStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let oracle = CompressionOracle::with_tolerance(metadata, cfg.staleness_tolerance());
        Self::new(items, oracle, Arc::new(cfg.clone()), DecisionPolicy::from_config(cfg))
    }

    pub fn oracle(&self) -> &CompressionOracle {
        &self.oracle
    }

    /// Decide whether `id` needs compressing. `force` bypasses only the
    /// auto-processing switch. Never fails: errors become the verdict chosen
    /// by the failure policy.
    pub fn evaluate(&self, id: &ItemId, force: bool) -> ProcessingDecision {
        let decision = match self.evaluate_checked(id, force) {
            Ok(decision) => decision,
            Err(StoreError::NotFound(_)) => {
                ProcessingDecision::skip(
                    SkipReason::BasicCheckFailed,
                    "item disappeared during evaluation",
                )
            }
            Err(e) => match self.policy.failure_policy {
                FailurePolicy::FailOpen => {
                    warn!("Evaluation of {} failed, processing anyway: {}", id, e);
                    ProcessingDecision::required(
                        CompressionMarker::absent(),
                        None,
                        format!("evaluation error: {}", e),
                    )
                }
                FailurePolicy::FailClosed => {
                    warn!("Evaluation of {} failed, skipping: {}", id, e);
                    ProcessingDecision::skip(
                        SkipReason::BasicCheckFailed,
                        format!("evaluation error: {}", e),
                    )
                }
            },
        };

        debug!(
            "Decision for {}: required={} reason={} ({})",
            id, decision.processing_required, decision.reason, decision.detail
        );
        decision
    }

    fn evaluate_checked(&self, id: &ItemId, force: bool) -> StoreResult<ProcessingDecision> {
        if !self.items.exists(id) {
            return Ok(ProcessingDecision::skip(
                SkipReason::BasicCheckFailed,
                "item does not exist",
            ));
        }

        let name = self.items.display_name(id)?;
        if is_renamed_original(&name) {
            return Ok(ProcessingDecision::skip(SkipReason::BasicCheckFailed, "renamed original"));
        }

        if !force && !self.settings.auto_processing_enabled() {
            return Ok(ProcessingDecision::skip(
                SkipReason::BasicCheckFailed,
                "automatic processing disabled",
            ));
        }

        let path = self.items.path(id)?;

        if !self.settings.process_screenshots() && is_screenshot(&name) {
            return Ok(ProcessingDecision::skip(SkipReason::BasicCheckFailed, "screenshot"));
        }
        if !self.settings.process_messenger_photos() && is_messenger_photo(&path) {
            return Ok(ProcessingDecision::skip(SkipReason::BasicCheckFailed, "messenger photo"));
        }

        if self.is_output_path(&path) {
            return Ok(ProcessingDecision::skip(
                SkipReason::InAppDirectory,
                "inside the app output directory",
            ));
        }

        if self.items.is_pending_write(id)? {
            return Ok(ProcessingDecision::skip(
                SkipReason::BasicCheckFailed,
                "still being written",
            ));
        }

        let mime = self.items.mime_type(id)?;
        if !is_supported_mime(&mime) {
            return Ok(ProcessingDecision::skip(
                SkipReason::BasicCheckFailed,
                format!("unsupported type {}", mime),
            ));
        }

        if !self.settings.replace_in_place() {
            let versions = self.items.compressed_versions(id, &self.policy.app_dir_name)?;
            if let Some(existing) = versions.first() {
                return Ok(ProcessingDecision::skip(
                    SkipReason::CompressedVersionExists,
                    format!("compressed version exists: {}", existing),
                ));
            }
        }

        let marker = self.oracle.get_marker(id);
        let modified_at = self.items.last_modified(id)?;
        if marker.is_compressed && !self.oracle.is_stale(&marker, modified_at) {
            return Ok(ProcessingDecision::skip(
                SkipReason::AlreadyCompressed,
                format!("marked at quality {}", marker.quality),
            )
            .with_state(marker, modified_at));
        }

        let size = self.items.size(id)?;
        if size < self.policy.optimum_size {
            return Ok(ProcessingDecision::skip(SkipReason::AlreadySmall, format!("{} bytes", size))
                .with_state(marker, modified_at));
        }

        let detail = if marker.is_compressed {
            "modified after compression"
        } else {
            "no compression marker"
        };
        Ok(ProcessingDecision::required(marker, Some(modified_at), detail))
    }

    fn is_output_path(&self, path: &str) -> bool {
        if is_in_app_directory(path, &self.policy.app_dir_name) {
            return true;
        }
        match &self.policy.output_dir {
            Some(dir) => std::path::Path::new(path).starts_with(dir),
            None => false,
        }
    }
}
