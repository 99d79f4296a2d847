pub mod classify;
pub mod clock;
pub mod config;
pub mod constants;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod exif_store;
pub mod fs_store;
pub mod marker;
pub mod memory;
pub mod naming;
pub mod oracle;
pub mod registry;
pub mod scan;
pub mod stats;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DedupConfig;
pub use constants::CompressionQuality;
pub use decision::{
    DecisionEngine, DecisionPolicy, FailurePolicy, ProcessingDecision, SkipReason,
};
pub use dispatch::{
    CompressRequest, CompressionOutcome, Compressor, DispatchOptions, DispatchOutcome, Dispatcher,
    Trigger, WorkItem,
};
pub use error::{DispatchError, StoreError, StoreResult};
pub use exif_store::{open_metadata_store, ExifMetadataStore, MarkerStorage};
pub use fs_store::{FileLock, FsItemStore, SidecarMetadataStore};
pub use marker::CompressionMarker;
pub use oracle::CompressionOracle;
pub use registry::{InFlightGuard, ProcessingRegistry};
pub use stats::CompressionStats;
pub use store::{ItemId, ItemStore, MetadataStore, Settings};
