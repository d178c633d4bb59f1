//! autoprov-trigger — where auto-provisioning decisions land.
//!
//! The aggregator only decides; the [`TriggerSink`] carries a decision
//! out as an app instance create. [`StoreSink`] is the in-process sink
//! used in standalone mode: it records instances in the `StateStore`
//! and publishes them to the local app instance cache, so the next
//! evaluation sees a live instance.

pub mod error;
pub mod sink;

pub use error::{TriggerError, TriggerResult};
pub use sink::{ClusterScaleSink, StoreSink, TriggerSink};
