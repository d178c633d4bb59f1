//! autoprov-aggr — the region aggregator.
//!
//! Periodically reads cumulative demand per (app, zone) from a
//! [`CountSource`](autoprov_metrics::CountSource), turns it into
//! per-interval deltas, and runs every policy of every tracked app
//! through a consecutive-interval state machine. A policy whose client
//! threshold was met for `deploy_interval_count` intervals in a row
//! triggers an app instance create through the
//! [`TriggerSink`](autoprov_trigger::TriggerSink).
//!
//! Tracking state follows the cache mirror: app and policy changes are
//! reconciled under the same lock the evaluation uses, so progress
//! survives live threshold and zone edits.
//!
//! # Architecture
//!
//! ```text
//! AutoProvAggr
//!   ├── AggrState   app → AppDemandState (zones, policy trackers)
//!   ├── run loop    wait_time(interval, offset) | process_now | stop
//!   └── callbacks   apps / policies → reconcile_app
//!
//! ClusterAutoScaler
//!   └── callbacks   alerts → ClusterScaleSink
//! ```

pub mod aggr;
pub mod autoscale;
pub mod error;
pub mod reconcile;
pub mod tracker;

pub use aggr::{AggrTiming, AppDemandReport, AutoProvAggr, IterSummary};
pub use autoscale::ClusterAutoScaler;
pub use error::{AggrError, AggrResult};
pub use tracker::{AppDemandState, PolicyTracker, ZoneStats, ZoneTracker};
