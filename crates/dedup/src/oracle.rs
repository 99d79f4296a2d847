use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::constants::TIME_DIFFERENCE_ALLOWED_SECONDS;
use crate::error::StoreError;
use crate::marker::CompressionMarker;
use crate::store::{ItemId, MetadataStore};

/// Answers whether an item already carries a compression marker
pub struct CompressionOracle {
    metadata: Arc<dyn MetadataStore>,
    tolerance: Duration,
}

impl CompressionOracle {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self::with_tolerance(metadata, Duration::seconds(TIME_DIFFERENCE_ALLOWED_SECONDS))
    }

    pub fn with_tolerance(metadata: Arc<dyn MetadataStore>, tolerance: Duration) -> Self {
        Self { metadata, tolerance }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Marker of `id`, or the absent sentinel. Read failures count as absent
    /// so an unreadable file is compressed rather than skipped forever.
    pub fn get_marker(&self, id: &ItemId) -> CompressionMarker {
        match self.metadata.read_marker(id) {
            Ok(Some(marker)) => marker,
            Ok(None) => CompressionMarker::absent(),
            Err(StoreError::NotFound(_)) => {
                debug!("No metadata for {}: item is gone", id);
                CompressionMarker::absent()
            }
            Err(e) => {
                warn!("Could not read compression marker for {}: {}", id, e);
                CompressionMarker::absent()
            }
        }
    }

    /// `requires_reprocessing` with this oracle's tolerance
    pub fn is_stale(&self, marker: &CompressionMarker, modified_at: DateTime<Utc>) -> bool {
        requires_reprocessing(marker, modified_at, self.tolerance)
    }
}

/// Whether an item must be compressed again given its marker and its current
/// modification time.
///
/// Writing the marker and updating the modification time are not atomic in
/// the media index, so a modification up to `tolerance` after the marker's
/// timestamp is not treated as an edit.
pub fn requires_reprocessing(
    marker: &CompressionMarker,
    modified_at: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    if !marker.is_compressed {
        return true;
    }

    let modified_ms = modified_at.timestamp_millis();
    if modified_ms <= marker.compressed_at {
        return false;
    }

    modified_ms - marker.compressed_at > tolerance.num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMetadataStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at_secs(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn marker_at_secs(secs: i64) -> CompressionMarker {
        CompressionMarker::new(70, secs * 1000)
    }

    #[test]
    fn test_tolerance_boundaries() {
        let marker = marker_at_secs(1000);
        let tolerance = Duration::seconds(20);

        assert!(!requires_reprocessing(&marker, at_secs(1015), tolerance));
        assert!(!requires_reprocessing(&marker, at_secs(1020), tolerance));
        assert!(requires_reprocessing(&marker, at_secs(1025), tolerance));
        assert!(!requires_reprocessing(&marker, at_secs(999), tolerance));
        assert!(!requires_reprocessing(&marker, at_secs(1000), tolerance));
    }

    #[test]
    fn test_unmarked_always_requires_processing() {
        let absent = CompressionMarker::absent();
        assert!(requires_reprocessing(&absent, at_secs(0), Duration::seconds(20)));
        assert!(requires_reprocessing(&absent, at_secs(5_000_000), Duration::seconds(20)));
    }

    #[test]
    fn test_marker_round_trip_and_overwrite() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let oracle = CompressionOracle::new(store.clone());
        let id = ItemId::from("content://media/7");
        let t = 1_700_000_000_000;

        assert_eq!(oracle.get_marker(&id), CompressionMarker::absent());

        store.write_marker(&id, 75, t).unwrap();
        assert_eq!(oracle.get_marker(&id), CompressionMarker::new(75, t));

        store.write_marker(&id, 90, t + 100).unwrap();
        assert_eq!(oracle.get_marker(&id), CompressionMarker::new(90, t + 100));
    }

    #[test]
    fn test_read_errors_are_absent() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let id = ItemId::from("broken");
        store.write_marker(&id, 70, 1).unwrap();
        store.fail_reads_for(&id);

        let oracle = CompressionOracle::new(store);
        assert_eq!(oracle.get_marker(&id), CompressionMarker::absent());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Modifications within the tolerance window never trigger reprocessing
        #[test]
        fn test_modifications_inside_tolerance_are_noise(
            compressed_at in 0i64..4_000_000_000,
            drift in 0i64..=20,
        ) {
            let marker = marker_at_secs(compressed_at);
            let modified = at_secs(compressed_at + drift);
            prop_assert!(!requires_reprocessing(&marker, modified, Duration::seconds(20)));
        }

        /// Modifications past the tolerance window always trigger reprocessing
        #[test]
        fn test_modifications_past_tolerance_are_edits(
            compressed_at in 0i64..4_000_000_000,
            drift in 21i64..1_000_000,
        ) {
            let marker = marker_at_secs(compressed_at);
            let modified = at_secs(compressed_at + drift);
            prop_assert!(requires_reprocessing(&marker, modified, Duration::seconds(20)));
        }
    }
}
