//! Query engine fake.
//!
//! The projection engine is product code in `inlet-domain`; tests use
//! it as the canonical fake, re-exported here for discoverability next
//! to the other fakes.

pub use inlet_domain::ProjectionQueryEngine;
