//! Span constructors for consistent structured logging.
//!
//! Every pipeline stage logs inside a span carrying the fields
//! operators filter on: the zone and table for zone processing, the
//! query name and batch id for streaming. Subscriber setup belongs to
//! the binaries; the library only emits events and spans.

use tracing::Span;

/// Creates a span for zone processing with standard fields.
#[must_use]
pub fn zone_span(zone: &str, source: &str, table: &str) -> Span {
    tracing::info_span!("zone", zone = zone, source = source, table = table)
}

/// Creates a span for one micro-batch of a streaming query.
#[must_use]
pub fn batch_span(query_name: &str, batch_id: i64) -> Span {
    tracing::info_span!("batch", query = query_name, batch_id = batch_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_span_carries_table_fields() {
        let span = zone_span("structured", "oms", "offenders");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }

    #[test]
    fn batch_span_carries_query_and_batch() {
        let span = batch_span("Inlet CDC oms.offenders", 7);
        let _guard = span.enter();
        tracing::debug!("test message in span");
    }
}
