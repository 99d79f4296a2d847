//! Work-dispatch boundary between trigger sources and the decision engine.
//!
//! Producers (library scans, file-change callbacks, manual requests) push
//! [`WorkItem`]s into a channel. The [`Dispatcher`] drains it, gates every item
//! through the registry and the decision engine, runs the compressor on a
//! blocking thread and records the marker and cooldown afterwards.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::decision::{DecisionEngine, ProcessingDecision};
use crate::error::DispatchError;
use crate::registry::ProcessingRegistry;
use crate::stats::CompressionStats;
use crate::store::{ItemId, MetadataStore};

/// What caused an item to be looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    FileChange,
    PeriodicScan,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: ItemId,
    pub trigger: Trigger,
    /// Bypass the auto-processing switch
    pub force: bool,
}

impl WorkItem {
    pub fn new(id: ItemId, trigger: Trigger) -> Self {
        Self {
            id,
            trigger,
            force: trigger == Trigger::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressRequest {
    pub source: ItemId,
    pub quality: i32,
    pub replace_in_place: bool,
}

/// Result reported by a compressor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// Output written; in replace mode `output` is the source itself
    Compressed {
        output: ItemId,
        original_size: u64,
        compressed_size: u64,
    },
    /// Saving below the efficiency threshold; nothing was kept
    NotEfficient {
        original_size: u64,
        compressed_size: u64,
    },
}

/// Pixel-level compress-and-save, provided by the embedding application
pub trait Compressor: Send + Sync {
    fn compress(&self, request: &CompressRequest) -> Result<CompressionOutcome, DispatchError>;
}

/// What happened to one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    CoolingDown,
    InFlight,
    Skipped(ProcessingDecision),
    Compressed {
        output: ItemId,
        original_size: u64,
        compressed_size: u64,
    },
    NotEfficient,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub quality: i32,
    pub cooldown: Duration,
    pub replace_in_place: bool,
}

impl DispatchOptions {
    pub fn from_config(cfg: &DedupConfig) -> Self {
        Self {
            quality: cfg.quality.value(),
            cooldown: cfg.cooldown(),
            replace_in_place: cfg.replace_in_place,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ProcessingRegistry>,
    engine: Arc<DecisionEngine>,
    metadata: Arc<dyn MetadataStore>,
    compressor: Arc<dyn Compressor>,
    clock: Arc<dyn Clock>,
    options: DispatchOptions,
    stats: Mutex<CompressionStats>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProcessingRegistry>,
        engine: Arc<DecisionEngine>,
        metadata: Arc<dyn MetadataStore>,
        compressor: Arc<dyn Compressor>,
        clock: Arc<dyn Clock>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            registry,
            engine,
            metadata,
            compressor,
            clock,
            options,
            stats: Mutex::new(CompressionStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessingRegistry> {
        &self.registry
    }

    /// Statistics since the last call
    pub fn take_stats(&self) -> CompressionStats {
        std::mem::take(&mut *self.stats.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record(&self, outcome: &DispatchOutcome) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            DispatchOutcome::CoolingDown => stats.record_skip("cooling down"),
            DispatchOutcome::InFlight => stats.record_skip("already in flight"),
            DispatchOutcome::Skipped(decision) => stats.record_skip(&decision.reason.to_string()),
            DispatchOutcome::NotEfficient => stats.record_skip("compression not efficient"),
            DispatchOutcome::Compressed {
                original_size,
                compressed_size,
                ..
            } => stats.record_success(*original_size, *compressed_size),
            DispatchOutcome::Failed(_) => stats.record_failure(),
        }
    }

    /// Handle one item synchronously. Blocks on store and compressor I/O.
    pub fn process(&self, item: &WorkItem) -> DispatchOutcome {
        let outcome = self.process_inner(item);
        self.record(&outcome);
        outcome
    }

    fn process_inner(&self, item: &WorkItem) -> DispatchOutcome {
        let id = &item.id;

        if self.registry.is_cooling_down(id) {
            debug!("Ignoring {:?} trigger for {}: cooling down", item.trigger, id);
            return DispatchOutcome::CoolingDown;
        }

        let Some(_guard) = self.registry.try_begin(id) else {
            debug!("Ignoring {:?} trigger for {}: already in flight", item.trigger, id);
            return DispatchOutcome::InFlight;
        };

        let decision = self.engine.evaluate(id, item.force);
        if !decision.processing_required {
            return DispatchOutcome::Skipped(decision);
        }

        let attempt = Uuid::new_v4();
        info!(
            "Compressing {} (attempt {}, trigger {:?}, quality {})",
            id, attempt, item.trigger, self.options.quality
        );

        let request = CompressRequest {
            source: id.clone(),
            quality: self.options.quality,
            replace_in_place: self.options.replace_in_place,
        };

        match self.compressor.compress(&request) {
            Ok(CompressionOutcome::Compressed {
                output,
                original_size,
                compressed_size,
            }) => {
                self.mark(&output, attempt);
                self.registry.start_cooldown(&output, self.options.cooldown);
                if output != *id {
                    self.registry.start_cooldown(id, self.options.cooldown);
                }
                info!(
                    "Compressed {} -> {} ({} -> {} bytes, attempt {})",
                    id, output, original_size, compressed_size, attempt
                );
                DispatchOutcome::Compressed {
                    output,
                    original_size,
                    compressed_size,
                }
            }
            Ok(CompressionOutcome::NotEfficient {
                original_size,
                compressed_size,
            }) => {
                // mark the source so later scans do not retry it
                self.mark(id, attempt);
                self.registry.start_cooldown(id, self.options.cooldown);
                info!(
                    "Compression of {} not efficient ({} -> {} bytes), keeping original",
                    id, original_size, compressed_size
                );
                DispatchOutcome::NotEfficient
            }
            Err(e) => {
                error!("Compression of {} failed (attempt {}): {}", id, attempt, e);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    fn mark(&self, id: &ItemId, attempt: Uuid) {
        let now_ms = self.clock.now().timestamp_millis();
        if let Err(e) = self.metadata.write_marker(id, self.options.quality, now_ms) {
            warn!("Failed to write compression marker on {} (attempt {}): {}", id, attempt, e);
        }
    }

    /// Drain `rx` until every sender is dropped, running at most
    /// `max_concurrent` items at once.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<WorkItem>, max_concurrent: usize) {
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(item) = next else { break };
                    let Ok(permit) = permits.clone().acquire_owned().await else { break };
                    let this = Arc::clone(&self);
                    tasks.spawn_blocking(move || {
                        let _permit = permit;
                        this.process(&item)
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.log_join(joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.log_join(joined);
        }
        debug!("Dispatcher stopped: all producers gone");
    }

    fn log_join(&self, joined: Result<DispatchOutcome, tokio::task::JoinError>) {
        if let Err(e) = joined {
            let err = DispatchError::Join(e.to_string());
            error!("{}", err);
            self.record(&DispatchOutcome::Failed(err.to_string()));
        }
    }
}
