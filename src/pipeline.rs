//! Transform-and-load for one uploaded batch.
//!
//! Runs the transformer, then the store writer when there is something to
//! write, and folds both into an [`IngestOutcome`] the HTTP layer can map
//! to a response.

use serde_json::Value;
use tracing::info;

use crate::{
    models::IngestBatch,
    store::{self, StoreConnector, StoreError},
    transform::transform,
};

// ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No record validated; the store was not contacted.
    NoValidPoints { skipped: usize },

    /// The store acknowledged the write.
    Written { count: usize, skipped: usize },

    /// The store answered but did not acknowledge the write.
    NotAcknowledged { skipped: usize },
}

/// Transform a decoded upload and write the accepted points.
///
/// Store errors are returned unchanged; the session has already been
/// released by the time they reach the caller.
pub async fn ingest(
    connector: &dyn StoreConnector,
    payload: Value,
) -> Result<IngestOutcome, StoreError> {
    // ---
    let batch = IngestBatch::from_json(payload);
    let received = batch.data.len();
    let transformed = transform(&batch);
    let skipped = transformed.skipped.len();

    info!(
        received,
        accepted = transformed.accepted_count(),
        skipped,
        "Upload transformed"
    );

    if transformed.is_empty() {
        info!("No valid data points to write");
        return Ok(IngestOutcome::NoValidPoints { skipped });
    }

    let result = store::write(connector, &transformed.points).await?;
    if result.ok {
        Ok(IngestOutcome::Written {
            count: result.count,
            skipped,
        })
    } else {
        Ok(IngestOutcome::NotAcknowledged { skipped })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::store::memory::{Behavior, MemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_batch_is_distinct_from_failed_write() {
        // ---
        let store = MemoryStore::new();
        let outcome = ingest(&store, json!({"data": []})).await.unwrap();

        assert_eq!(outcome, IngestOutcome::NoValidPoints { skipped: 0 });
        assert_eq!(store.opened(), 0);
    }

    #[tokio::test]
    async fn test_mixed_validity_writes_valid_records() {
        // ---
        let store = MemoryStore::new();
        let payload = json!({"data": [
            {"TIME": "01.06.2024 00:00:00", "METERSERIAL": "A", "INDEX_CIT": 5},
            {"TIME": "not a date", "METERSERIAL": "B"},
            {"TIME": "01.06.2024 01:00:00", "METERSERIAL": "A", "INDEX_CIT": 6},
        ]});

        let outcome = ingest(&store, payload).await.unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Written {
                count: 2,
                skipped: 1
            }
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unacknowledged_write() {
        // ---
        let store = MemoryStore::with_behavior(Behavior::Unacknowledged);
        let payload = json!({"data": [{"TIME": "01.06.2024 00:00:00"}]});

        let outcome = ingest(&store, payload).await.unwrap();
        assert_eq!(outcome, IngestOutcome::NotAcknowledged { skipped: 0 });
    }

    #[tokio::test]
    async fn test_store_error_propagates_after_release() {
        // ---
        let store = MemoryStore::with_behavior(Behavior::Fail("timed out".into()));
        let payload = json!({"data": [{"TIME": "01.06.2024 00:00:00"}]});

        let err = ingest(&store, payload).await.unwrap_err();
        assert_eq!(err.to_string(), "store unavailable: timed out");
        assert_eq!(store.closed(), 1);
    }
}
