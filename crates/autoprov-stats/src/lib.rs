//! autoprov-stats — the count generator.
//!
//! Every edge-serving process owns one [`AutoProvStats`]. Each client
//! request that qualifies as demand for an (app, zone) increments a
//! counter; counters are spread over independently locked shards so
//! concurrent requests rarely contend.
//!
//! A background task wakes on interval boundaries and exports the
//! cumulative count of every counter that moved since the previous
//! export. For policies that deploy after a single interval, the
//! increment that crosses the threshold also sends an immediate
//! `process_now` message so the aggregator can act before the next
//! boundary.

pub mod generator;
pub mod policy;

pub use generator::{AutoProvStats, BoxFuture, SendCallback, shard_index};
pub use policy::governing_policy;
