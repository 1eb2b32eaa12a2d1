//! Domain refresh metrics.

use metrics::describe_counter;

/// Domain tables refreshed from CDC slices.
pub const DOMAIN_TABLES_REFRESHED: &str = "inlet_domain_tables_refreshed_total";

/// Domain table refreshes that failed (logged, batch continues).
pub const DOMAIN_REFRESH_FAILURES: &str = "inlet_domain_refresh_failures_total";

/// Registers all domain metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        DOMAIN_TABLES_REFRESHED,
        "Total domain tables refreshed from CDC slices"
    );
    describe_counter!(
        DOMAIN_REFRESH_FAILURES,
        "Total failed domain table refreshes"
    );
}
