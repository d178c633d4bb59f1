//! Persisted record types for the count store.

use serde::{Deserialize, Serialize};

use autoprov_core::{AppInst, AppKey, ZoneKey};

/// Latest cumulative count one node reported for an (app, zone).
///
/// A node that restarts begins counting from zero again. When a newer
/// report is lower than the previous one, the previous value is folded
/// into `base` so `total()` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeCount {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
    pub node_name: String,
    /// Sum of final counts from previous runs of the node.
    pub base: u64,
    /// Last cumulative count reported by the current run of the node.
    pub last: u64,
    /// Timestamp (milliseconds) of the last applied report.
    pub updated_at: u64,
}

impl NodeCount {
    pub fn new(app_key: AppKey, zone_key: ZoneKey, node_name: &str) -> Self {
        Self {
            app_key,
            zone_key,
            node_name: node_name.to_string(),
            base: 0,
            last: 0,
            updated_at: 0,
        }
    }

    /// Apply a report. Returns false if the report was stale and ignored.
    ///
    /// A lower count with an older-or-equal timestamp is an out-of-order
    /// delivery, not a restart.
    pub fn observe(&mut self, count: u64, timestamp: u64) -> bool {
        if count < self.last {
            if timestamp <= self.updated_at {
                return false;
            }
            self.base += self.last;
        }
        self.last = count;
        self.updated_at = self.updated_at.max(timestamp);
        true
    }

    pub fn total(&self) -> u64 {
        self.base + self.last
    }

    /// Build the composite key for the counts table.
    pub fn table_key(&self) -> String {
        node_count_key(&self.app_key, &self.zone_key, &self.node_name)
    }
}

/// Summed cumulative count for an (app, zone) across all nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountTotal {
    pub app_key: AppKey,
    pub zone_key: ZoneKey,
    pub count: u64,
}

/// Prefix shared by every node's record for an (app, zone).
pub fn app_zone_prefix(app_key: &AppKey, zone_key: &ZoneKey) -> String {
    format!("{app_key}|{zone_key}|")
}

pub fn node_count_key(app_key: &AppKey, zone_key: &ZoneKey, node_name: &str) -> String {
    format!("{}{node_name}", app_zone_prefix(app_key, zone_key))
}

/// Build the composite key for the app instances table.
pub fn app_inst_key(inst: &AppInst) -> String {
    format!("{}|{}", inst.app_key, inst.zone_key)
}
