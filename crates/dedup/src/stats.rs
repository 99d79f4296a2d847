use std::collections::BTreeMap;

use serde::Serialize;

/// Running totals for a batch of dispatched items
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressionStats {
    pub processed: u64,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub original_size_total: u64,
    pub compressed_size_total: u64,
    pub skipped_reasons: BTreeMap<String, u64>,
}

impl CompressionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, original_size: u64, compressed_size: u64) {
        self.processed += 1;
        self.success += 1;
        self.original_size_total += original_size;
        self.compressed_size_total += compressed_size;
    }

    pub fn record_skip(&mut self, reason: &str) {
        self.processed += 1;
        self.skipped += 1;
        *self.skipped_reasons.entry(reason.to_string()).or_default() += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn saved_bytes(&self) -> u64 {
        self.original_size_total.saturating_sub(self.compressed_size_total)
    }

    pub fn saved_percent(&self) -> f64 {
        if self.original_size_total == 0 {
            return 0.0;
        }
        self.saved_bytes() as f64 / self.original_size_total as f64 * 100.0
    }
}
