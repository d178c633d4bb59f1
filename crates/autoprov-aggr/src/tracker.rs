//! Per-app demand tracking state.
//!
//! An [`AppDemandState`] exists for every app that uses at least one
//! policy, all of which are known. It holds the cumulative-count
//! baseline of every zone the app's policies cover, and one
//! [`PolicyTracker`] per policy with a [`ZoneTracker`] per covered zone.

use std::collections::{BTreeMap, BTreeSet};

use autoprov_core::{AutoProvPolicy, ZoneKey};

/// Demand seen for one zone of an app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneStats {
    /// Sum of all deltas observed since tracking began.
    pub count: u64,
    /// Cumulative count as of the previous evaluation. `None` until the
    /// zone has been observed once.
    pub last_count: Option<u64>,
}

impl ZoneStats {
    /// Fold in a new cumulative reading and return the delta since the
    /// previous one. The first reading only sets the baseline and
    /// returns `None`.
    pub fn observe(&mut self, current: u64) -> Option<u64> {
        let Some(last) = self.last_count else {
            self.last_count = Some(current);
            return None;
        };
        let delta = current.saturating_sub(last);
        self.last_count = Some(last.max(current));
        self.count += delta;
        Some(delta)
    }

    /// Reset the baseline without counting anything.
    pub fn rebaseline(&mut self, current: u64) {
        self.last_count = Some(current);
    }

    /// Delta a reading would produce, without consuming it.
    pub fn pending(&self, current: u64) -> Option<u64> {
        self.last_count.map(|last| current.saturating_sub(last))
    }
}

/// Thresholds cached from a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub deploy_client_count: u32,
    pub deploy_interval_count: u32,
    pub undeploy_client_count: u32,
    pub undeploy_interval_count: u32,
}

impl Thresholds {
    /// Consecutive intervals needed to deploy. Zero behaves as one.
    pub fn required_intervals(&self) -> u32 {
        self.deploy_interval_count.max(1)
    }

    pub fn is_single_interval(&self) -> bool {
        self.deploy_interval_count <= 1
    }

    fn client_count_met(&self, delta: u64) -> bool {
        delta >= u64::from(self.deploy_client_count)
    }
}

/// Result of one periodic evaluation of a zone tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    /// The deploy run completed in this interval.
    pub deploy: bool,
    /// The low-demand run reached the undeploy threshold.
    pub undeploy: bool,
}

/// Consecutive-interval progress of one policy in one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneTracker {
    pub deploy_intervals_met: u32,
    pub undeploy_intervals_met: u32,
    /// A fast-path evaluation already acted on the current interval.
    pub fast_path_fired: bool,
    /// The deploy run completed; the next evaluation starts a new one.
    run_complete: bool,
}

impl ZoneTracker {
    /// Evaluate one interval's delta.
    ///
    /// A completed run stays visible at the full count until the next
    /// evaluation, which starts counting from zero again.
    pub fn evaluate(&mut self, delta: u64, th: &Thresholds) -> Outcome {
        let undeploy = self.track_undeploy(delta, th);

        if self.run_complete {
            self.run_complete = false;
            self.deploy_intervals_met = 0;
        }
        if self.fast_path_fired {
            // This interval's demand was already acted on.
            self.fast_path_fired = false;
            self.deploy_intervals_met = 0;
            return Outcome {
                deploy: false,
                undeploy,
            };
        }

        let required = th.required_intervals();
        if th.client_count_met(delta) {
            self.deploy_intervals_met = (self.deploy_intervals_met + 1).min(required);
        } else {
            self.deploy_intervals_met = 0;
        }

        let deploy = self.deploy_intervals_met >= required;
        if deploy {
            self.run_complete = true;
        }
        Outcome { deploy, undeploy }
    }

    /// Early evaluation for a single-interval policy. `pending` is the
    /// demand since the last periodic evaluation. Returns true if this
    /// interval now deploys; at most once per interval.
    pub fn evaluate_fast_path(&mut self, pending: u64, th: &Thresholds) -> bool {
        if !th.is_single_interval() || self.fast_path_fired || !th.client_count_met(pending) {
            return false;
        }
        self.fast_path_fired = true;
        true
    }

    fn track_undeploy(&mut self, delta: u64, th: &Thresholds) -> bool {
        if th.undeploy_interval_count == 0 {
            self.undeploy_intervals_met = 0;
            return false;
        }
        if delta <= u64::from(th.undeploy_client_count) {
            self.undeploy_intervals_met =
                (self.undeploy_intervals_met + 1).min(th.undeploy_interval_count);
        } else {
            self.undeploy_intervals_met = 0;
        }
        self.undeploy_intervals_met >= th.undeploy_interval_count
    }

    /// Keep progress within a (possibly lowered) threshold.
    fn clamp(&mut self, th: &Thresholds) {
        self.deploy_intervals_met = self.deploy_intervals_met.min(th.required_intervals());
        self.undeploy_intervals_met = self
            .undeploy_intervals_met
            .min(th.undeploy_interval_count);
    }
}

/// Tracking for one policy of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTracker {
    pub thresholds: Thresholds,
    /// One tracker per zone in the policy, always matching its zone list.
    pub zone_trackers: BTreeMap<ZoneKey, ZoneTracker>,
}

impl PolicyTracker {
    pub fn from_policy(policy: &AutoProvPolicy) -> Self {
        let mut tracker = Self {
            thresholds: thresholds_of(policy),
            zone_trackers: BTreeMap::new(),
        };
        tracker.sync(policy);
        tracker
    }

    /// Refresh thresholds and zone trackers from the latest policy.
    /// Progress in zones the policy still covers is kept.
    pub fn sync(&mut self, policy: &AutoProvPolicy) {
        self.thresholds = thresholds_of(policy);
        self.zone_trackers.retain(|zone, _| policy.covers(zone));
        for zone in &policy.zones {
            self.zone_trackers.entry(zone.clone()).or_default();
        }
        let th = self.thresholds;
        for tracker in self.zone_trackers.values_mut() {
            tracker.clamp(&th);
        }
    }
}

fn thresholds_of(policy: &AutoProvPolicy) -> Thresholds {
    Thresholds {
        deploy_client_count: policy.deploy_client_count,
        deploy_interval_count: policy.deploy_interval_count,
        undeploy_client_count: policy.undeploy_client_count,
        undeploy_interval_count: policy.undeploy_interval_count,
    }
}

/// Everything the aggregator tracks for one app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppDemandState {
    pub zones: BTreeMap<ZoneKey, ZoneStats>,
    /// Keyed by policy name; policies share the app's organization.
    pub policies: BTreeMap<String, PolicyTracker>,
}

impl AppDemandState {
    /// Zones covered by any policy of the app.
    pub fn tracked_zones(&self) -> BTreeSet<ZoneKey> {
        self.policies
            .values()
            .flat_map(|p| p.zone_trackers.keys().cloned())
            .collect()
    }

    pub fn tracks_zone(&self, zone: &ZoneKey) -> bool {
        self.policies
            .values()
            .any(|p| p.zone_trackers.contains_key(zone))
    }

    /// Drop zone stats no policy covers any more.
    pub fn prune_zones(&mut self) -> usize {
        let tracked = self.tracked_zones();
        let before = self.zones.len();
        self.zones.retain(|zone, _| tracked.contains(zone));
        before - self.zones.len()
    }

    /// Whether a single-interval policy covers the zone.
    pub fn has_fast_path(&self, zone: &ZoneKey) -> bool {
        self.policies
            .values()
            .any(|p| p.thresholds.is_single_interval() && p.zone_trackers.contains_key(zone))
    }
}
