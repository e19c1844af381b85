//! Record transformer: uploaded batch in, validated points out.
//!
//! Pure and synchronous. Each record is validated on its own; a record that
//! fails is logged and dropped, and the rest of the batch carries on.

use tracing::{debug, warn};

use crate::models::{IngestBatch, RawReading, SkipReason, WaterPoint};

// ---

/// A record that did not make it into the output, with its batch position.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: SkipReason,
}

/// Result of transforming one batch.
#[derive(Debug, Default)]
pub struct Transformed {
    // ---
    /// Accepted points, in input order.
    pub points: Vec<WaterPoint>,

    /// Rejected records, in input order.
    pub skipped: Vec<SkippedRecord>,
}

impl Transformed {
    pub fn accepted_count(&self) -> usize {
        self.points.len()
    }

    /// True when no record validated and there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Validate every record of `batch`, preserving input order.
pub fn transform(batch: &IngestBatch) -> Transformed {
    // ---
    let mut out = Transformed::default();

    for (index, value) in batch.data.iter().enumerate() {
        let result = RawReading::try_from(value).and_then(|raw| WaterPoint::from_raw(&raw));

        match result {
            Ok(point) => {
                debug!(index, time = %point.iso_timestamp(), "Record accepted");
                out.points.push(point);
            }
            Err(reason) => {
                warn!(index, %reason, record = %value, "Skipping record");
                out.skipped.push(SkippedRecord { index, reason });
            }
        }
    }

    debug!(
        accepted = out.points.len(),
        skipped = out.skipped.len(),
        "Batch transformed"
    );
    out
}
