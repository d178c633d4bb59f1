//! Write side of the metrics store.
//!
//! Each batch exported by a count generator is persisted as-is; entries
//! flagged `process_now` are forwarded afterwards so the aggregator
//! reads a store that already holds the new count.

use std::sync::Arc;

use tracing::{debug, warn};

use autoprov_core::{AppZoneKey, AutoProvCounts};
use autoprov_state::{CountTotal, StateStore};

use crate::error::MetricsResult;

/// Invoked for each (app, zone) a fast-path message asked to evaluate now.
pub type ProcessNowCallback = Arc<dyn Fn(AppZoneKey) + Send + Sync>;

/// Persists exported counts into the [`StateStore`].
#[derive(Clone)]
pub struct CountIngest {
    store: StateStore,
    process_now: Option<ProcessNowCallback>,
}

impl CountIngest {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            process_now: None,
        }
    }

    /// Set the callback that receives fast-path requests.
    pub fn with_process_now(mut self, f: ProcessNowCallback) -> Self {
        self.process_now = Some(f);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Store a batch. Returns the number of entries applied.
    pub fn ingest(&self, batch: &AutoProvCounts) -> MetricsResult<usize> {
        let applied = self.store.put_counts(batch)?;
        debug!(
            node = %batch.node_name,
            received = batch.counts.len(),
            applied,
            "auto-prov counts ingested"
        );

        if let Some(ref process_now) = self.process_now {
            for entry in batch.counts.iter().filter(|c| c.process_now) {
                debug!(key = %entry.key(), count = entry.count, "process-now request");
                process_now(entry.key());
            }
        } else if batch.counts.iter().any(|c| c.process_now) {
            warn!(node = %batch.node_name, "process-now request dropped, no aggregator attached");
        }
        Ok(applied)
    }

    /// Summed totals for every (app, zone), for exposition.
    pub fn totals(&self) -> MetricsResult<Vec<CountTotal>> {
        Ok(self.store.list_count_totals()?)
    }
}
