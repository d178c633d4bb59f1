//! autoprov-metrics — the metrics store seen from both ends.
//!
//! The count generator's exports are written through [`CountIngest`];
//! the aggregator reads cumulative demand back through the
//! [`CountSource`] trait. [`render_prometheus`] exposes the same totals
//! in the Prometheus text format.

pub mod error;
pub mod ingest;
pub mod prometheus;
pub mod source;

pub use error::{MetricsError, MetricsResult};
pub use ingest::{CountIngest, ProcessNowCallback};
pub use prometheus::render_prometheus;
pub use source::CountSource;
