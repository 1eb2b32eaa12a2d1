//! Ingestion metrics.
//!
//! These complement the structured logging already in place. The two
//! merge-failure counters are deliberately separate: exhausted retries
//! divert the batch to violations, while generic merge failures are
//! only logged, and operators need to see both rates.

use metrics::{describe_counter, describe_histogram};

/// Micro-batches processed per streaming query.
pub const BATCHES_PROCESSED: &str = "inlet_batches_processed_total";

/// Rows diverted to the violations zone.
pub const VIOLATION_ROWS: &str = "inlet_violation_rows_total";

/// Merge batches diverted after retries were exhausted.
pub const MERGE_RETRIES_EXHAUSTED: &str = "inlet_merge_retries_exhausted_total";

/// Merge batches that failed for non-retryable reasons (logged only).
pub const MERGE_FAILURES: &str = "inlet_merge_failures_total";

/// Rows that failed schema validation.
pub const VALIDATION_FAILURES: &str = "inlet_validation_failures_total";

/// Batch processing duration.
pub const BATCH_DURATION: &str = "inlet_batch_duration_seconds";

/// Registers all ingestion metric descriptions.
///
/// Call once at job startup after initialising the metrics recorder.
pub fn register_metrics() {
    describe_counter!(BATCHES_PROCESSED, "Total micro-batches processed");
    describe_counter!(VIOLATION_ROWS, "Total rows diverted to the violations zone");
    describe_counter!(
        MERGE_RETRIES_EXHAUSTED,
        "Total merge batches diverted after exhausted retries"
    );
    describe_counter!(
        MERGE_FAILURES,
        "Total non-retryable merge failures (logged, not diverted)"
    );
    describe_counter!(VALIDATION_FAILURES, "Total rows failing schema validation");
    describe_histogram!(BATCH_DURATION, "Micro-batch processing duration in seconds");
}
